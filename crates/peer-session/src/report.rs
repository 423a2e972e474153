//! Host-facing records for metrics and model metadata.

use serde::Serialize;

use crate::request::StopReason;
use crate::session::Session;

/// Session configuration plus the last run's metrics and stop state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub n_ctx: u32,
    pub n_threads: u32,
    pub n_gpu_layers: i32,
    pub use_gpu_backend: bool,
    pub prompt_tokens: usize,
    pub generation_tokens: usize,
    pub ttfs_ms: f64,
    pub prefill_ms: f64,
    pub decode_ms: f64,
    pub total_ms: f64,
    pub tps: f64,
    pub prompt_tps: f64,
    pub context_used_pct: f64,
    pub truncated: bool,
    pub stop_reason: StopReason,
    pub stop_sequence: String,
}

/// Static metadata of a model file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub arch: String,
    pub n_ctx_train: i32,
    pub n_layer: i32,
    pub n_embd: i32,
    pub n_vocab: i32,
    pub chat_template: String,
    pub tokenizer_model: String,
    pub reasoning: bool,
    pub tags: String,
}

impl Session {
    pub fn report(&self) -> MetricsReport {
        let state = self.lock();
        let m = &state.metrics;
        MetricsReport {
            n_ctx: state.config.context_length,
            n_threads: state.config.threads,
            n_gpu_layers: state.config.gpu_layers,
            use_gpu_backend: state.config.use_gpu_backend,
            prompt_tokens: m.prompt_tokens,
            generation_tokens: m.generated_tokens,
            ttfs_ms: m.ttfs_ms,
            prefill_ms: m.prefill_ms,
            decode_ms: m.decode_ms,
            total_ms: m.total_ms,
            tps: m.tokens_per_sec,
            prompt_tps: m.prompt_tokens_per_sec,
            context_used_pct: m.context_used_pct,
            truncated: m.truncated,
            stop_reason: state.stop_reason,
            stop_sequence: state.stop_sequence.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_report_keys() {
        let value = serde_json::to_value(MetricsReport::default()).unwrap();
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        for key in [
            "nCtx",
            "nThreads",
            "nGpuLayers",
            "useGpuBackend",
            "promptTokens",
            "generationTokens",
            "ttfsMs",
            "prefillMs",
            "decodeMs",
            "totalMs",
            "tps",
            "promptTps",
            "contextUsedPct",
            "truncated",
            "stopReason",
            "stopSequence",
        ] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert_eq!(keys.len(), 16);
        assert_eq!(value["stopReason"], "none");
    }

    #[test]
    fn model_info_keys() {
        let info = ModelInfo {
            arch: "llama".into(),
            n_ctx_train: 4096,
            reasoning: true,
            ..ModelInfo::default()
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["arch"], "llama");
        assert_eq!(value["nCtxTrain"], 4096);
        assert_eq!(value["reasoning"], true);
        assert!(value.get("chatTemplate").is_some());
        assert!(value.get("tokenizerModel").is_some());
    }
}
