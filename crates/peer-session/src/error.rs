//! Session error types.

use std::path::PathBuf;

use peer_engine::EngineError;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("no model loaded")]
    NotLoaded,

    #[error("context state is empty")]
    EmptyState,

    #[error("runtime rejected state of {0} bytes")]
    StateRejected(usize),

    #[error("invalid state length {length} for a buffer of {capacity} bytes")]
    InvalidLength { length: usize, capacity: usize },
}

/// A streaming consumer refused a chunk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("receiver disconnected")]
    Disconnected,

    #[error("{0}")]
    Rejected(String),
}
