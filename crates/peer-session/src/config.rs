//! Load configuration.

use peer_runtime::{Backend, LoadPlan};
use serde::Deserialize;

/// How a session loads a model.
///
/// Values are normalised when the model is loaded, see [`LoadConfig::plan`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoadConfig {
    pub threads: u32,
    pub context_length: u32,
    pub gpu_layers: i32,
    pub use_gpu_backend: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            context_length: 4096,
            gpu_layers: 0,
            use_gpu_backend: true,
        }
    }
}

impl LoadConfig {
    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_context_length(mut self, context_length: u32) -> Self {
        self.context_length = context_length;
        self
    }

    pub fn with_gpu_layers(mut self, gpu_layers: i32) -> Self {
        self.gpu_layers = gpu_layers;
        self
    }

    pub fn with_gpu_backend(mut self, use_gpu_backend: bool) -> Self {
        self.use_gpu_backend = use_gpu_backend;
        self
    }

    pub fn backend(&self) -> Backend {
        Backend::from_flag(self.use_gpu_backend)
    }

    pub fn plan(&self) -> LoadPlan {
        LoadPlan::new(
            self.backend(),
            self.threads,
            self.context_length,
            self.gpu_layers,
        )
    }

    /// The configuration a session reports after loading with `plan`.
    pub(crate) fn effective(&self, plan: &LoadPlan) -> Self {
        Self {
            threads: plan.context.n_threads,
            context_length: plan.context.n_ctx,
            gpu_layers: plan.model.gpu_layers,
            use_gpu_backend: self.use_gpu_backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LoadConfig::default();
        assert_eq!(config.threads, 4);
        assert_eq!(config.context_length, 4096);
        assert_eq!(config.gpu_layers, 0);
        assert!(config.use_gpu_backend);
    }

    #[test]
    fn builder() {
        let config = LoadConfig::default()
            .with_threads(8)
            .with_context_length(8192)
            .with_gpu_layers(20)
            .with_gpu_backend(false);
        assert_eq!(config.threads, 8);
        assert_eq!(config.context_length, 8192);
        assert_eq!(config.gpu_layers, 20);
        assert_eq!(config.backend(), Backend::Cpu);
    }

    #[test]
    fn effective_config_is_normalised() {
        let config = LoadConfig::default()
            .with_threads(0)
            .with_context_length(100)
            .with_gpu_layers(10)
            .with_gpu_backend(false);
        let effective = config.effective(&config.plan());
        assert_eq!(effective.threads, 1);
        assert_eq!(effective.context_length, 512);
        assert_eq!(effective.gpu_layers, 0);
        assert!(!effective.use_gpu_backend);
    }

    #[test]
    fn negative_gpu_layers_survive_on_gpu_backend() {
        let config = LoadConfig::default().with_gpu_layers(-1);
        assert_eq!(config.effective(&config.plan()).gpu_layers, -1);

        let cpu = config.with_gpu_backend(false);
        assert_eq!(cpu.effective(&cpu.plan()).gpu_layers, 0);
    }

    #[test]
    fn deserialize_negative_gpu_layers() {
        let config: LoadConfig = serde_json::from_str(r#"{"gpuLayers": -1}"#).unwrap();
        assert_eq!(config.gpu_layers, -1);
    }

    #[test]
    fn deserialize_partial_json() {
        let config: LoadConfig =
            serde_json::from_str(r#"{"threads": 2, "useGpuBackend": false}"#).unwrap();
        assert_eq!(config.threads, 2);
        assert_eq!(config.context_length, 4096);
        assert!(!config.use_gpu_backend);
    }
}
