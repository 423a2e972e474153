//! Runs in its own process so the first stochastic run is the first seed drawn.

mod common;

use std::time::{SystemTime, UNIX_EPOCH};

use common::Fixture;
use peer_engine::SamplerStage;
use peer_runtime::MockManifest;
use peer_session::GenerationRequest;

fn wall_clock_micros() -> u32 {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_micros();
    (micros & 0xFFFF_FFFF) as u32
}

fn last_seed(fx: &Fixture) -> u32 {
    match fx.backend.last_sampler_stages().last() {
        Some(SamplerStage::Distribution { seed }) => *seed,
        other => panic!("expected a distribution stage, got {other:?}"),
    }
}

#[test]
fn first_stochastic_run_is_seeded_from_the_wall_clock() {
    let fx = Fixture::loaded(&MockManifest::default());
    let req = GenerationRequest::new("x").with_temperature(0.8);

    let before = wall_clock_micros();
    fx.session.generate(&req);
    let after = wall_clock_micros();
    let first = last_seed(&fx);

    // Masked clock values wrap every ~71 minutes; compare as offsets.
    assert!(first.wrapping_sub(before) <= after.wrapping_sub(before));

    fx.session.generate(&req);
    let second = last_seed(&fx);
    assert!(second.wrapping_sub(first) <= wall_clock_micros().wrapping_sub(first));
}
