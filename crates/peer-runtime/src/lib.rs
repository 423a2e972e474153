//! # peer-runtime
//!
//! Runtime-side plumbing shared by sessions: compute backend selection and
//! batch sizing, telemetry hooks (TTFT, tok/s, context usage), and a
//! deterministic scripted implementation of the Runtime Binding traits.

pub mod backend;
pub mod mock;
pub mod telemetry;

pub use backend::{Backend, BackendError, BatchPolicy, LoadPlan, MIN_CONTEXT_LENGTH};
pub use mock::{Faults, MockManifest, ScriptedBackend};
pub use telemetry::{
    LogTelemetry, Metrics, NoopTelemetry, RunTimer, RunTimings, TelemetryHook,
};
