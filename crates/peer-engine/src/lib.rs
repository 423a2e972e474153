//! # peer-engine
//!
//! The "narrow waist" of the peer stack. Defines the Runtime Binding traits that
//! the session layer sequences calls through: [`Runtime`], [`Model`], [`Context`]
//! and [`Sampler`]. The tensor runtime behind them (tokenizer, kernels, sampling
//! math, GPU backend) is a black box; implementations can swap llama.cpp, a
//! scripted mock, or anything else without changing session code.
//!
//! ## Design Notes
//!
//! ### Handles
//! A [`Model`] is exclusively owned by whoever loaded it. A [`Context`] is created
//! from a model and must be released before that model. Both are `Send` so a
//! session can keep them behind a mutex, but neither is required to be `Sync`.
//!
//! ### Failure returns
//! The runtime reports failures the way llama.cpp does: decode/encode return a
//! status (mapped to [`EngineError::Decode`] / [`EngineError::Encode`]), tokenization
//! reports an undersized output buffer with the exact capacity it needs, and
//! piece conversion returns a byte count where non-positive means "no text".
//!
//! ### Token Type
//! `TokenId` is aliased as `i32` for FFI compatibility, though token IDs are logically
//! non-negative.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;

/// Failures reported by a runtime binding.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),
    #[error("context creation failed: {0}")]
    ContextCreate(String),
    #[error("tokenization failed: {0}")]
    Tokenization(String),
    #[error("decode failed with status {0}")]
    Decode(i32),
    #[error("encode failed with status {0}")]
    Encode(i32),
    #[error("sampler chain construction failed: {0}")]
    Sampler(String),
}

/// Parameters for loading model weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelParams {
    /// Layers offloaded to the GPU backend (0 = CPU only, negative = all).
    pub gpu_layers: i32,
    /// Memory-map the weights instead of reading them.
    pub use_mmap: bool,
    /// Pin mapped weights in RAM.
    pub use_mlock: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            gpu_layers: 0,
            use_mmap: true,
            use_mlock: false,
        }
    }
}

/// Parameters for creating a context from a loaded model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextParams {
    pub n_ctx: u32,
    pub n_threads: u32,
    pub n_threads_batch: u32,
    /// Logical batch size (max tokens per decode call).
    pub n_batch: u32,
    /// Physical micro-batch size.
    pub n_ubatch: u32,
    /// Keep the KQV cache on the accelerator.
    pub offload_kqv: bool,
    /// Produce embeddings instead of logits.
    pub embeddings: bool,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: 4096,
            n_threads: 4,
            n_threads_batch: 4,
            n_batch: 512,
            n_ubatch: 128,
            offload_kqv: false,
            embeddings: false,
        }
    }
}

/// One stage of a sampler chain, applied in order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplerStage {
    /// Arg-max selection.
    Greedy,
    /// Keep the `k` most likely candidates.
    TopK(i32),
    /// Keep the smallest set whose probability mass reaches `p`.
    TopP { p: f32, min_keep: usize },
    /// Scale logits by `1 / t`.
    Temperature(f32),
    /// Seeded stochastic final choice.
    Distribution { seed: u32 },
}

/// Result of a tokenization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizeOutcome {
    /// `n` tokens were written to the output buffer.
    Written(usize),
    /// The output buffer was too small; `required` tokens are needed.
    Undersized { required: usize },
}

/// Cooperative cancellation flag shared between a running generation and
/// out-of-band callers.
///
/// Cloning shares the flag. Setting it never blocks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Clear a previous request so the token can be reused.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Entry point of a runtime binding.
pub trait Runtime: Send + Sync {
    /// Process-wide runtime initialization. Must be idempotent.
    fn init(&self);

    /// Load model weights from disk.
    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Box<dyn Model>>;

    /// Build a sampler chain from an ordered list of stages.
    fn sampler(&self, stages: &[SamplerStage]) -> Result<Box<dyn Sampler>>;
}

/// A loaded model: vocabulary, metadata, and a factory for contexts.
pub trait Model: Send {
    /// Create a new inference context bound to this model.
    fn new_context(&self, params: &ContextParams) -> Result<Box<dyn Context>>;

    /// Tokenize `text` into `out`.
    ///
    /// Returns [`TokenizeOutcome::Undersized`] instead of writing a partial
    /// sequence when `out` is too small.
    fn tokenize(
        &self,
        text: &str,
        out: &mut [TokenId],
        add_special: bool,
        parse_special: bool,
    ) -> Result<TokenizeOutcome>;

    /// Whether an undersized tokenization reports the exact capacity needed.
    fn reports_required_capacity(&self) -> bool {
        true
    }

    /// Write the text of `token` into `buf`, returning the byte count.
    /// Non-positive values mean the token has no printable piece.
    fn token_to_piece(&self, token: TokenId, buf: &mut [u8]) -> i32;

    /// End-of-generation tokens (EOS, EOT, ...).
    fn is_end_of_generation(&self, token: TokenId) -> bool;

    fn n_ctx_train(&self) -> i32;
    fn n_layer(&self) -> i32;
    fn n_embd(&self) -> i32;
    fn n_vocab(&self) -> i32;

    /// Copy the metadata value for `key` into `buf`.
    ///
    /// Returns the full length of the value in bytes (which may exceed
    /// `buf.len()`, in which case only a prefix was written), or `None` if the
    /// key is absent.
    fn meta_value(&self, key: &str, buf: &mut [u8]) -> Option<usize>;
}

/// Mutable per-context decode state (KV cache, logits, embeddings).
pub trait Context: Send {
    fn set_threads(&mut self, n_threads: u32, n_threads_batch: u32);

    /// Install a cancellation probe the runtime polls during long kernels.
    fn set_abort_probe(&mut self, probe: CancelToken);

    /// Clear the working memory. `discard_data` also frees the buffers
    /// rather than only resetting token history.
    fn clear_memory(&mut self, discard_data: bool);

    /// Advance the context by `tokens`.
    fn decode(&mut self, tokens: &[TokenId]) -> Result<()>;

    /// Run the encoder over `tokens` (embeddings contexts).
    fn encode(&mut self, tokens: &[TokenId]) -> Result<()>;

    /// Logits for the last decoded position.
    fn logits(&self) -> &[f32];

    /// Pooled embeddings from the last encode, if any.
    fn embeddings(&self) -> Option<&[f32]>;

    fn n_ctx(&self) -> u32;

    /// Serialized size of the context state in bytes.
    fn state_size(&self) -> usize;

    /// Serialize state into `dst`, returning bytes written (0 on failure).
    fn state_read(&self, dst: &mut [u8]) -> usize;

    /// Load serialized state, returning bytes consumed (0 if rejected).
    fn state_write(&mut self, src: &[u8]) -> usize;
}

/// A constructed sampler chain.
pub trait Sampler: Send {
    /// Pick the next token from `logits`.
    fn sample(&mut self, logits: &[f32]) -> TokenId;

    /// Feed the chosen token back into stateful stages.
    fn accept(&mut self, token: TokenId);
}
