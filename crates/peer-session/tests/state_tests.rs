mod common;

use common::{greedy, Fixture};
use peer_runtime::MockManifest;
use peer_session::{SessionError, StopReason};

#[test]
fn unloaded_session_has_no_state() {
    let fx = Fixture::new(&MockManifest::default());
    assert_eq!(fx.session.state_size(), 0);
    assert!(matches!(
        fx.session.state_capture(),
        Err(SessionError::NotLoaded)
    ));
    let mut buf = [0u8; 16];
    assert!(matches!(
        fx.session.state_capture_into(&mut buf),
        Err(SessionError::NotLoaded)
    ));
    assert!(matches!(
        fx.session.state_restore(b"{}"),
        Err(SessionError::NotLoaded)
    ));
    fx.session.state_clear(true);
}

#[test]
fn capture_and_restore_after_a_run() {
    let fx = Fixture::loaded(&MockManifest::default());
    fx.session.generate(&greedy("abc"));

    let snapshot = fx.session.state_capture().unwrap();
    assert_eq!(snapshot.len(), fx.session.state_size());

    fx.session.state_clear(false);
    assert_ne!(fx.session.state_size(), snapshot.len());

    fx.session.state_restore(&snapshot).unwrap();
    assert_eq!(fx.session.state_capture().unwrap(), snapshot);
    assert_eq!(fx.session.metrics(), Default::default());
    assert_eq!(fx.session.stop_state().0, StopReason::None);
}

#[test]
fn capture_into_small_buffer_is_partial() {
    let fx = Fixture::loaded(&MockManifest::default());
    fx.session.generate(&greedy("abc"));
    let full = fx.session.state_capture().unwrap();

    let mut small = [0u8; 5];
    assert_eq!(fx.session.state_capture_into(&mut small).unwrap(), 5);
    assert_eq!(&small[..], &full[..5]);

    let mut large = vec![0u8; full.len() + 64];
    assert_eq!(fx.session.state_capture_into(&mut large).unwrap(), full.len());
    assert_eq!(&large[..full.len()], &full[..]);

    assert_eq!(fx.session.state_capture_into(&mut []).unwrap(), 0);
}

#[test]
fn restore_from_prefix_of_a_buffer() {
    let fx = Fixture::loaded(&MockManifest::default());
    fx.session.generate(&greedy("abc"));
    let snapshot = fx.session.state_capture().unwrap();

    let mut padded = snapshot.clone();
    padded.extend_from_slice(&[0xAA; 32]);
    fx.session.state_clear(true);
    fx.session.state_restore_from(&padded, snapshot.len()).unwrap();
    assert_eq!(fx.session.state_capture().unwrap(), snapshot);
}

#[test]
fn restore_from_validates_length() {
    let fx = Fixture::loaded(&MockManifest::default());
    let buf = [0u8; 8];
    assert!(matches!(
        fx.session.state_restore_from(&buf, 0),
        Err(SessionError::EmptyState)
    ));
    assert!(matches!(
        fx.session.state_restore_from(&buf, 9),
        Err(SessionError::InvalidLength {
            length: 9,
            capacity: 8
        })
    ));
}

#[test]
fn empty_input_is_rejected() {
    let fx = Fixture::loaded(&MockManifest::default());
    assert!(matches!(
        fx.session.state_restore(&[]),
        Err(SessionError::EmptyState)
    ));
}

#[test]
fn garbage_is_rejected_and_metrics_kept() {
    let fx = Fixture::loaded(&MockManifest::default());
    fx.session.generate(&greedy("x"));
    let before = fx.session.metrics();

    let err = fx.session.state_restore(b"not a state").unwrap_err();
    assert!(matches!(err, SessionError::StateRejected(11)));
    assert_eq!(fx.session.metrics(), before);
    assert!(fx.session.is_loaded());
}

#[test]
fn state_clear_resets_run_history() {
    let fx = Fixture::loaded(&MockManifest::default());
    fx.session.generate(&greedy("abc"));
    let used = fx.session.state_size();

    fx.session.state_clear(true);
    assert!(fx.session.state_size() < used);
    assert_eq!(fx.session.metrics(), Default::default());
    assert_eq!(fx.session.stop_state(), (StopReason::None, String::new()));
}

#[test]
fn restored_state_does_not_leak_into_next_run() {
    let fx = Fixture::loaded(&MockManifest::default());
    fx.session.generate(&greedy("abc"));
    let snapshot = fx.session.state_capture().unwrap();
    fx.session.state_restore(&snapshot).unwrap();

    // Runs always start from cleared memory.
    let completion = fx.session.generate(&greedy("abc"));
    assert_eq!(completion.text, "Hello, world!");
    assert_eq!(completion.summary.metrics.prompt_tokens, 4);
}
