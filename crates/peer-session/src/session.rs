//! Session lifecycle and locking.
//!
//! A [`Session`] owns the model and context handles of one loaded model. Every
//! operation that reads or mutates session state takes the single session lock
//! for its whole duration, so loads, runs and state operations are serialised
//! and a second caller waits its turn. The cancellation token is the only state
//! touched without the lock.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};

use peer_engine::{CancelToken, Context, EngineError, Model, Runtime};
use peer_runtime::{Metrics, NoopTelemetry, TelemetryHook};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::LoadConfig;
use crate::error::{Result, SessionError};
use crate::generate;
use crate::request::{Completion, GenerationRequest, GenerationSummary, StopReason};
use crate::sink::{Output, TokenSink};
use crate::tokens;

/// Handles of a loaded model.
pub(crate) struct Loaded {
    // Fields drop in declaration order; the context must go before its model.
    pub(crate) context: Box<dyn Context>,
    pub(crate) model: Box<dyn Model>,
}

/// Everything guarded by the session lock.
pub(crate) struct SessionState {
    pub(crate) loaded: Option<Loaded>,
    pub(crate) config: LoadConfig,
    pub(crate) metrics: Metrics,
    pub(crate) stop_reason: StopReason,
    pub(crate) stop_sequence: String,
}

impl SessionState {
    fn new() -> Self {
        Self {
            loaded: None,
            config: LoadConfig::default(),
            metrics: Metrics::default(),
            stop_reason: StopReason::None,
            stop_sequence: String::new(),
        }
    }

    fn commit(&mut self, summary: &GenerationSummary) {
        self.metrics = summary.metrics.clone();
        self.stop_reason = summary.reason;
        self.stop_sequence = summary.stop_sequence.clone();
    }
}

/// A model session: load, generate, snapshot, unload.
pub struct Session {
    id: Uuid,
    pub(crate) runtime: Arc<dyn Runtime>,
    pub(crate) telemetry: Arc<dyn TelemetryHook>,
    pub(crate) cancel: CancelToken,
    init: Once,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            id: Uuid::new_v4(),
            runtime,
            telemetry: Arc::new(NoopTelemetry),
            cancel: CancelToken::new(),
            init: Once::new(),
            state: Mutex::new(SessionState::new()),
        }
    }

    /// Report run timings to `hook` instead of discarding them.
    pub fn with_telemetry(mut self, hook: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = hook;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Initialize the runtime once for this session.
    pub fn init(&self) {
        self.init.call_once(|| {
            self.runtime.init();
            info!(session = %self.id, "runtime initialized");
        });
    }

    /// A panicking sink poisons the lock; the state itself stays consistent,
    /// so the guard is recovered rather than propagating the panic.
    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear run history and any pending abort.
    pub(crate) fn reset_run_state(&self, state: &mut SessionState) {
        state.metrics = Metrics::default();
        state.stop_reason = StopReason::None;
        state.stop_sequence.clear();
        self.cancel.reset();
    }

    fn release(&self, state: &mut SessionState) {
        self.cancel.reset();
        state.loaded = None;
        self.reset_run_state(state);
    }

    /// Load a model, replacing any model already loaded.
    ///
    /// A missing file leaves the session untouched. Otherwise the previous
    /// handles are released first, so a load that fails in the runtime leaves
    /// the session unloaded.
    pub fn load(&self, path: &Path, config: &LoadConfig) -> Result<()> {
        let is_file = std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false);
        if !is_file {
            warn!(path = %path.display(), "model path not found");
            return Err(SessionError::ModelNotFound(path.to_path_buf()));
        }

        self.init();
        let mut state = self.lock();
        self.release(&mut state);

        let plan = config.plan();
        let model = self
            .runtime
            .load_model(path, &plan.model)
            .map_err(|err| log_load_failure("failed to load model", err))?;
        let mut context = model
            .new_context(&plan.context)
            .map_err(|err| log_load_failure("failed to create context", err))?;
        context.set_threads(plan.context.n_threads, plan.context.n_threads_batch);

        state.loaded = Some(Loaded { context, model });
        state.config = config.effective(&plan);
        self.reset_run_state(&mut state);

        info!(
            session = %self.id,
            backend = %plan.backend,
            n_ctx = state.config.context_length,
            n_threads = state.config.threads,
            gpu_layers = state.config.gpu_layers,
            n_batch = plan.context.n_batch,
            n_ubatch = plan.context.n_ubatch,
            "model loaded"
        );
        Ok(())
    }

    /// Release the model and its context. Safe to call when nothing is loaded.
    pub fn unload(&self) {
        let mut state = self.lock();
        self.release(&mut state);
        info!(session = %self.id, "engine unloaded");
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().loaded.is_some()
    }

    /// Configuration in effect: the normalised values of the last load.
    pub fn config(&self) -> LoadConfig {
        self.lock().config.clone()
    }

    /// Metrics of the last run.
    pub fn metrics(&self) -> Metrics {
        self.lock().metrics.clone()
    }

    /// Stop reason and matched stop text of the last run.
    pub fn stop_state(&self) -> (StopReason, String) {
        let state = self.lock();
        (state.stop_reason, state.stop_sequence.clone())
    }

    /// Ask a running generation to stop. Never blocks.
    pub fn abort(&self) {
        self.cancel.cancel();
        info!(session = %self.id, "abort requested");
    }

    /// A token that aborts this session's generation from any thread.
    pub fn abort_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run a generation and return its text.
    pub fn generate(&self, req: &GenerationRequest) -> Completion {
        let mut text = String::new();
        let summary = {
            let mut state = self.lock();
            let mut output = Output::buffered(&mut text);
            let summary = generate::run(self, &mut state, req, &mut output);
            state.commit(&summary);
            summary
        };
        Completion { text, summary }
    }

    /// Run a generation, streaming text into `sink`.
    ///
    /// The sink receives its terminal `("", true)` call before the session
    /// lock is released.
    pub fn generate_stream(
        &self,
        req: &GenerationRequest,
        sink: &mut dyn TokenSink,
    ) -> GenerationSummary {
        let mut state = self.lock();
        let mut output = Output::streaming(sink);
        let summary = generate::run(self, &mut state, req, &mut output);
        state.commit(&summary);
        drop(output);
        summary
    }

    /// Number of tokens `text` tokenizes to, special tokens included.
    pub fn count_tokens(&self, text: &str) -> Result<usize> {
        let state = self.lock();
        let loaded = state.loaded.as_ref().ok_or(SessionError::NotLoaded)?;
        let tokens = tokens::tokenize(loaded.model.as_ref(), text)?;
        debug!(tokens = tokens.len(), "counted tokens");
        Ok(tokens.len())
    }
}

fn log_load_failure(what: &str, err: EngineError) -> SessionError {
    error!(error = %err, "{what}");
    SessionError::Engine(err)
}
