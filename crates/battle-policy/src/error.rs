//! Error types for battle-policy

use thiserror::Error;

/// Validation guard error type
#[derive(Debug, Error)]
pub enum GuardError {
    /// Command failed validation at the configured security level
    #[error("command rejected: {0}")]
    CommandRejected(String),

    /// Path escaped its base directory or was malformed
    #[error("path rejected: {0}")]
    PathRejected(String),

    /// A shared ceiling (e.g. concurrent PTYs) was hit
    #[error("resource limit exceeded: {resource} (limit {limit})")]
    ResourceLimitExceeded {
        /// Name of the exhausted resource
        resource: &'static str,
        /// Configured ceiling
        limit: usize,
    },

    /// Guard configuration could not be read or parsed
    #[error("guard config error: {0}")]
    Config(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, GuardError>;
