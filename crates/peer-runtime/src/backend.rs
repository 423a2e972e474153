//! Backend selection and batch sizing for context creation.
//!
//! Provides:
//! - [`Backend`]: CPU-only or GPU-offloaded (Vulkan) execution
//! - [`BatchPolicy`]: logical/physical batch sizes derived from the backend and context length
//! - [`LoadPlan`]: normalised model + context parameters for a session load

use std::fmt;
use std::str::FromStr;

use peer_engine::{ContextParams, ModelParams};

/// Smallest context window a session is created with.
pub const MIN_CONTEXT_LENGTH: u32 = 512;

/// Compute backend requested for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Cpu,
    Vulkan,
}

impl Backend {
    /// Map the host-facing "use accelerated backend" flag.
    pub fn from_flag(use_gpu_backend: bool) -> Self {
        if use_gpu_backend {
            Backend::Vulkan
        } else {
            Backend::Cpu
        }
    }

    pub fn is_accelerated(self) -> bool {
        matches!(self, Backend::Vulkan)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Cpu => write!(f, "cpu"),
            Backend::Vulkan => write!(f, "vulkan"),
        }
    }
}

/// Errors from backend parsing.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unknown backend `{0}` (expected `cpu` or `vulkan`)")]
    Unknown(String),
}

impl FromStr for Backend {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Backend::Cpu),
            "vulkan" | "gpu" => Ok(Backend::Vulkan),
            other => Err(BackendError::Unknown(other.to_string())),
        }
    }
}

/// Decode batch sizing for a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub n_batch: u32,
    pub n_ubatch: u32,
    pub offload_kqv: bool,
}

impl BatchPolicy {
    /// Larger batches keep a GPU busy; CPU decoding prefers small ones.
    /// Both are clamped to `n_ctx`.
    pub fn for_backend(backend: Backend, n_ctx: u32) -> Self {
        let (n_batch, n_ubatch, offload_kqv) = match backend {
            Backend::Vulkan => {
                let n_batch = (n_ctx / 4).min(2048);
                (n_batch, (n_batch / 4).min(512), true)
            }
            Backend::Cpu => {
                let n_batch = (n_ctx / 8).min(512);
                (n_batch, (n_batch / 4).min(128), false)
            }
        };
        Self {
            n_batch: n_batch.min(n_ctx),
            n_ubatch: n_ubatch.min(n_ctx),
            offload_kqv,
        }
    }
}

/// Normalised parameters for loading a model and creating its context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    pub backend: Backend,
    pub model: ModelParams,
    pub context: ContextParams,
}

impl LoadPlan {
    /// Raise the context to [`MIN_CONTEXT_LENGTH`] and threads to 1, and
    /// drop GPU offload entirely on the CPU backend. A negative layer count
    /// is passed through on accelerated backends.
    pub fn new(backend: Backend, threads: u32, context_length: u32, gpu_layers: i32) -> Self {
        let n_ctx = context_length.max(MIN_CONTEXT_LENGTH);
        let n_threads = threads.max(1);
        let batch = BatchPolicy::for_backend(backend, n_ctx);

        let model = ModelParams {
            gpu_layers: if backend.is_accelerated() { gpu_layers } else { 0 },
            use_mmap: true,
            use_mlock: false,
        };
        let context = ContextParams {
            n_ctx,
            n_threads,
            n_threads_batch: n_threads,
            n_batch: batch.n_batch,
            n_ubatch: batch.n_ubatch,
            offload_kqv: batch.offload_kqv,
            embeddings: false,
        };

        Self {
            backend,
            model,
            context,
        }
    }

    /// Parameters for a metadata-only load: CPU, no offload, mapped.
    pub fn metadata_only() -> ModelParams {
        ModelParams {
            gpu_layers: 0,
            use_mmap: true,
            use_mlock: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_from_flag() {
        assert_eq!(Backend::from_flag(true), Backend::Vulkan);
        assert_eq!(Backend::from_flag(false), Backend::Cpu);
    }

    #[test]
    fn backend_display() {
        assert_eq!(format!("{}", Backend::Cpu), "cpu");
        assert_eq!(format!("{}", Backend::Vulkan), "vulkan");
    }

    #[test]
    fn backend_parse() {
        assert_eq!("CPU".parse::<Backend>().unwrap(), Backend::Cpu);
        assert_eq!("gpu".parse::<Backend>().unwrap(), Backend::Vulkan);
        let err = "metal".parse::<Backend>().unwrap_err();
        assert!(err.to_string().contains("metal"));
    }

    #[test]
    fn gpu_batch_policy_at_default_context() {
        let policy = BatchPolicy::for_backend(Backend::Vulkan, 4096);
        assert_eq!(policy.n_batch, 1024);
        assert_eq!(policy.n_ubatch, 256);
        assert!(policy.offload_kqv);
    }

    #[test]
    fn gpu_batch_policy_caps_large_contexts() {
        let policy = BatchPolicy::for_backend(Backend::Vulkan, 32768);
        assert_eq!(policy.n_batch, 2048);
        assert_eq!(policy.n_ubatch, 512);
    }

    #[test]
    fn cpu_batch_policy() {
        let policy = BatchPolicy::for_backend(Backend::Cpu, 4096);
        assert_eq!(policy.n_batch, 512);
        assert_eq!(policy.n_ubatch, 128);
        assert!(!policy.offload_kqv);

        let small = BatchPolicy::for_backend(Backend::Cpu, 512);
        assert_eq!(small.n_batch, 64);
        assert_eq!(small.n_ubatch, 16);
    }

    #[test]
    fn load_plan_normalises_inputs() {
        let plan = LoadPlan::new(Backend::Cpu, 0, 128, 33);
        assert_eq!(plan.context.n_ctx, MIN_CONTEXT_LENGTH);
        assert_eq!(plan.context.n_threads, 1);
        assert_eq!(plan.context.n_threads_batch, 1);
        assert_eq!(plan.model.gpu_layers, 0);
        assert!(plan.model.use_mmap);
    }

    #[test]
    fn load_plan_keeps_gpu_layers_on_vulkan() {
        let plan = LoadPlan::new(Backend::Vulkan, 6, 8192, 33);
        assert_eq!(plan.model.gpu_layers, 33);
        assert_eq!(plan.context.n_ctx, 8192);
        assert_eq!(plan.context.n_batch, 2048);
        assert!(plan.context.offload_kqv);
        assert!(!plan.context.embeddings);
    }

    #[test]
    fn negative_gpu_layers_offload_all_only_on_vulkan() {
        assert_eq!(LoadPlan::new(Backend::Vulkan, 4, 4096, -1).model.gpu_layers, -1);
        assert_eq!(LoadPlan::new(Backend::Cpu, 4, 4096, -1).model.gpu_layers, 0);
    }
}
