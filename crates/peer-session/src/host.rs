//! Flat host boundary.
//!
//! Mirrors the operations a host application binds to: every result is a
//! boolean, a string, a number or a JSON record, and no error crosses this
//! boundary. Failures are logged and mapped to the documented empty values.

use std::path::Path;
use std::sync::Arc;

use peer_engine::Runtime;
use tracing::debug;

use crate::config::LoadConfig;
use crate::request::GenerationRequest;
use crate::session::Session;
use crate::sink::TokenSink;

/// A [`Session`] behind host-friendly signatures.
pub struct HostEngine {
    session: Session,
}

fn non_negative(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn clamp_to_i32(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn request(
    prompt: &str,
    system_prompt: &str,
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_tokens: i32,
    stops: &[String],
) -> GenerationRequest {
    GenerationRequest {
        prompt: prompt.to_string(),
        system_prompt: (!system_prompt.is_empty()).then(|| system_prompt.to_string()),
        temperature,
        top_p,
        top_k,
        max_tokens: max_tokens.max(1) as usize,
        stops: stops.to_vec(),
    }
}

impl HostEngine {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self::from_session(Session::new(runtime))
    }

    pub fn from_session(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn init(&self) {
        self.session.init();
    }

    pub fn load_model(
        &self,
        path: &str,
        threads: i32,
        context_length: i32,
        gpu_layers: i32,
        use_accelerated_backend: bool,
    ) -> bool {
        let config = LoadConfig::default()
            .with_threads(non_negative(threads))
            .with_context_length(non_negative(context_length))
            .with_gpu_layers(gpu_layers)
            .with_gpu_backend(use_accelerated_backend);
        self.session.load(Path::new(path), &config).is_ok()
    }

    pub fn unload(&self) {
        self.session.unload();
    }

    /// Buffered generation; empty on failure.
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: f32,
        top_p: f32,
        top_k: i32,
        max_tokens: i32,
        stops: &[String],
    ) -> String {
        let req = request(prompt, system_prompt, temperature, top_p, top_k, max_tokens, stops);
        let completion = self.session.generate(&req);
        if completion.summary.success {
            completion.text
        } else {
            String::new()
        }
    }

    /// Streaming generation. `callback` always ends with one `("", true)` call.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_stream(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: f32,
        top_p: f32,
        top_k: i32,
        max_tokens: i32,
        stops: &[String],
        callback: &mut dyn TokenSink,
    ) {
        let req = request(prompt, system_prompt, temperature, top_p, top_k, max_tokens, stops);
        let summary = self.session.generate_stream(&req, callback);
        debug!(reason = %summary.reason, success = summary.success, "stream finished");
    }

    /// One vector per text; empty list when no model is loaded.
    pub fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        self.session.embed(texts).unwrap_or_default()
    }

    pub fn count_tokens(&self, text: &str) -> i32 {
        self.session.count_tokens(text).map_or(0, clamp_to_i32)
    }

    /// Metrics record as JSON.
    pub fn metrics(&self) -> String {
        serde_json::to_string(&self.session.report()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Model record as JSON, `{}` when the model cannot be read.
    pub fn detect_model(&self, path: &str) -> String {
        self.session
            .detect_model(Path::new(path))
            .and_then(|info| serde_json::to_string(&info).ok())
            .unwrap_or_else(|| "{}".to_string())
    }

    pub fn state_capture(&self) -> Vec<u8> {
        self.session.state_capture().unwrap_or_default()
    }

    pub fn state_capture_into(&self, buffer: &mut [u8]) -> i32 {
        self.session
            .state_capture_into(buffer)
            .map_or(0, clamp_to_i32)
    }

    pub fn state_restore(&self, bytes: &[u8]) -> bool {
        self.session.state_restore(bytes).is_ok()
    }

    pub fn state_restore_from(&self, buffer: &[u8], length: i32) -> bool {
        length > 0 && self.session.state_restore_from(buffer, length as usize).is_ok()
    }

    pub fn state_size(&self) -> i32 {
        clamp_to_i32(self.session.state_size())
    }

    pub fn state_clear(&self, also_discard_data: bool) {
        self.session.state_clear(also_discard_data);
    }

    pub fn abort(&self) {
        self.session.abort();
    }
}
