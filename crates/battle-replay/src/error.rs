//! Error types for battle-replay

use thiserror::Error;

/// Replay error type
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Document is malformed, oversized or structurally wrong
    #[error("invalid replay: {0}")]
    InvalidReplay(String),

    /// Recording ceiling reached
    #[error("resource limit exceeded: {0}")]
    LimitExceeded(String),

    /// Filesystem error while saving or loading
    #[error("replay I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ReplayError>;
