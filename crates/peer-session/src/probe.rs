//! Model metadata probe.
//!
//! Loads a model file CPU-only and memory-mapped, reads its metadata and
//! releases it again. Nothing here touches a session.

use std::path::Path;

use peer_engine::{Model, Runtime};
use peer_runtime::LoadPlan;
use tracing::{debug, warn};

use crate::report::ModelInfo;
use crate::session::Session;

/// Initial metadata read buffer; longer values get one regrown read.
const META_BUFFER_LEN: usize = 2048;

pub const KEY_ARCH: &str = "general.architecture";
pub const KEY_CHAT_TEMPLATE: &str = "tokenizer.chat_template";
pub const KEY_CHAT_TEMPLATE_FALLBACK: &str = "llama.chat_template";
pub const KEY_TOKENIZER_MODEL: &str = "tokenizer.ggml.model";
pub const KEY_TAGS: &str = "general.tags";
pub const KEY_CAPABILITIES: &str = "general.capabilities";
pub const KEY_REASONING: &str = "general.capabilities.reasoning";

/// Read metadata of the model at `path`. `None` on a missing file or a
/// failed load.
pub fn detect_model(runtime: &dyn Runtime, path: &Path) -> Option<ModelInfo> {
    runtime.init();
    inspect(runtime, path)
}

impl Session {
    /// [`detect_model`] through this session's runtime. Does not touch the
    /// loaded model.
    pub fn detect_model(&self, path: &Path) -> Option<ModelInfo> {
        self.init();
        inspect(self.runtime.as_ref(), path)
    }
}

fn inspect(runtime: &dyn Runtime, path: &Path) -> Option<ModelInfo> {
    if !std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false) {
        debug!(path = %path.display(), "probe: no such model file");
        return None;
    }

    let model = match runtime.load_model(path, &LoadPlan::metadata_only()) {
        Ok(model) => model,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to load model metadata");
            return None;
        }
    };

    let model = model.as_ref();
    let mut chat_template = read_meta(model, KEY_CHAT_TEMPLATE);
    if chat_template.is_empty() {
        chat_template = read_meta(model, KEY_CHAT_TEMPLATE_FALLBACK);
    }
    let tags = read_meta(model, KEY_TAGS);
    let reasoning = is_reasoning_capable(
        &read_meta(model, KEY_REASONING),
        &read_meta(model, KEY_CAPABILITIES),
        &tags,
        &chat_template,
    );

    Some(ModelInfo {
        arch: read_meta(model, KEY_ARCH),
        n_ctx_train: model.n_ctx_train(),
        n_layer: model.n_layer(),
        n_embd: model.n_embd(),
        n_vocab: model.n_vocab(),
        chat_template,
        tokenizer_model: read_meta(model, KEY_TOKENIZER_MODEL),
        reasoning,
        tags,
    })
}

/// Metadata string for `key`, empty when absent.
fn read_meta(model: &dyn Model, key: &str) -> String {
    let mut buf = vec![0u8; META_BUFFER_LEN];
    let Some(len) = model.meta_value(key, &mut buf) else {
        return String::new();
    };
    if len >= buf.len() {
        buf = vec![0u8; len + 1];
        if model.meta_value(key, &mut buf).is_none() {
            return String::new();
        }
    }
    let value = &buf[..len.min(buf.len())];
    let end = value.iter().position(|&b| b == 0).unwrap_or(value.len());
    String::from_utf8_lossy(&value[..end]).into_owned()
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    !needle.is_empty() && haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Whether metadata marks the model as able to emit reasoning traces.
pub fn is_reasoning_capable(flag: &str, capabilities: &str, tags: &str, chat_template: &str) -> bool {
    contains_ignore_case(flag, "true")
        || contains_ignore_case(capabilities, "reasoning")
        || contains_ignore_case(tags, "reasoning")
        || contains_ignore_case(chat_template, "<think>")
        || contains_ignore_case(chat_template, "<reasoning>")
}
