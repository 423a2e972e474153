#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use peer_runtime::{MockManifest, ScriptedBackend};
use peer_session::{GenerationRequest, GenerationSummary, LoadConfig, Session, SinkError};
use tempfile::TempDir;

/// A session over a scripted model file.
pub struct Fixture {
    pub backend: ScriptedBackend,
    pub session: Arc<Session>,
    pub path: PathBuf,
    dir: TempDir,
}

impl Fixture {
    /// Write `manifest` somewhere temporary; the session starts unloaded.
    pub fn new(manifest: &MockManifest) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        manifest.write_to(&path).unwrap();
        let backend = ScriptedBackend::new();
        let session = Arc::new(Session::new(Arc::new(backend.clone())));
        Self {
            backend,
            session,
            path,
            dir,
        }
    }

    /// Same, loaded with `config`.
    pub fn loaded_with(manifest: &MockManifest, config: &LoadConfig) -> Self {
        let fixture = Self::new(manifest);
        fixture.session.load(&fixture.path, config).unwrap();
        fixture
    }

    pub fn loaded(manifest: &MockManifest) -> Self {
        Self::loaded_with(manifest, &LoadConfig::default())
    }

    /// Another model file next to this one.
    pub fn write_model(&self, name: &str, manifest: &MockManifest) -> PathBuf {
        let path = self.dir.path().join(name);
        manifest.write_to(&path).unwrap();
        path
    }

    /// Stream `req`, recording every sink call.
    pub fn stream(&self, req: &GenerationRequest) -> (Vec<(String, bool)>, GenerationSummary) {
        let mut events = Vec::new();
        let mut sink = |text: &str, done: bool| -> Result<(), SinkError> {
            events.push((text.to_string(), done));
            Ok(())
        };
        let summary = self.session.generate_stream(req, &mut sink);
        (events, summary)
    }
}

/// Deterministic request for `prompt`.
pub fn greedy(prompt: &str) -> GenerationRequest {
    GenerationRequest::new(prompt).with_temperature(0.0)
}

/// Concatenated non-terminal chunks.
pub fn joined(events: &[(String, bool)]) -> String {
    events
        .iter()
        .filter(|(_, done)| !done)
        .map(|(text, _)| text.as_str())
        .collect()
}

/// Asserts the streaming contract: non-empty chunks, then exactly one `("", true)`.
pub fn assert_terminated_once(events: &[(String, bool)]) {
    let done: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, (_, done))| *done)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(done, vec![events.len() - 1], "events: {events:?}");
    assert_eq!(events[events.len() - 1].0, "");
    assert!(events[..events.len() - 1]
        .iter()
        .all(|(text, _)| !text.is_empty()));
}
