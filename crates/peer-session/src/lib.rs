//! # peer-session
//!
//! Drives a local text-generation model through a session lifecycle on top of
//! the [`peer_engine`] Runtime Binding traits.
//!
//! Supports:
//! - Load/unload with backend-dependent batch sizing ([`Session::load`])
//! - Buffered and streaming generation with stop sequences ([`Session::generate`],
//!   [`Session::generate_stream`])
//! - Cooperative cancellation from any thread ([`Session::abort_handle`])
//! - Per-run metrics ([`Session::metrics`], [`Session::report`])
//! - Context state snapshots ([`Session::state_capture`], [`Session::state_restore`])
//! - Embeddings and token counting
//! - Side-effect-free model metadata probing ([`detect_model`])
//! - A flat host boundary with no error returns ([`HostEngine`])
//!
//! A session serialises every operation on one lock. Generation holds it for
//! the whole run, so sinks must not call back into the session.

pub mod config;
pub mod error;
pub mod host;
pub mod probe;
pub mod report;
pub mod request;
pub mod sink;

mod embed;
mod generate;
mod session;
mod snapshot;
mod tokens;

pub use config::LoadConfig;
pub use error::{Result, SessionError, SinkError};
pub use host::HostEngine;
pub use probe::{detect_model, is_reasoning_capable};
pub use report::{MetricsReport, ModelInfo};
pub use request::{Completion, GenerationRequest, GenerationSummary, StopReason};
pub use session::Session;
pub use sink::{ChannelSink, StreamEvent, TokenSink};
pub use snapshot::MAX_REPORTED_STATE;

pub use peer_engine::CancelToken;
pub use peer_runtime::{LogTelemetry, Metrics, NoopTelemetry, TelemetryHook};
