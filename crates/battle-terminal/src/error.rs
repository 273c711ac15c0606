//! Error types for battle-terminal

use battle_policy::GuardError;
use battle_replay::ReplayError;
use std::path::PathBuf;
use thiserror::Error;

/// Terminal session error type
#[derive(Debug, Error)]
pub enum TerminalError {
    /// The backend could not start the process
    #[error("failed to spawn '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    /// The requested backend cannot be used on this system
    #[error("terminal backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Expect timed out
    #[error(
        "pattern {pattern:?} not found within {timeout_ms}ms{}",
        screenshot_note(.screenshot)
    )]
    PatternNotFound {
        pattern: String,
        timeout_ms: u64,
        screenshot: Option<PathBuf>,
    },

    /// Command, path or environment declined by the validation guard
    #[error("validation rejected: {0}")]
    ValidationRejected(String),

    /// Replay document could not be parsed or validated
    #[error("invalid replay: {0}")]
    InvalidReplay(String),

    /// PTY or event ceiling reached
    #[error("resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),

    /// Regex failed to compile
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// Operation needs a live process
    #[error("no process is running")]
    NotRunning,

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn screenshot_note(screenshot: &Option<PathBuf>) -> String {
    match screenshot {
        Some(path) => format!(" (screenshot: {})", path.display()),
        None => String::new(),
    }
}

impl TerminalError {
    /// Validation and replay-format failures, as opposed to runtime failures
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ValidationRejected(_) | Self::InvalidReplay(_) | Self::InvalidPattern(_)
        )
    }
}

impl From<GuardError> for TerminalError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::ResourceLimitExceeded { .. } => Self::ResourceLimitExceeded(err.to_string()),
            GuardError::Config(message) => Self::Config(message),
            other => Self::ValidationRejected(other.to_string()),
        }
    }
}

impl From<ReplayError> for TerminalError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::InvalidReplay(message) => Self::InvalidReplay(message),
            ReplayError::LimitExceeded(message) => Self::ResourceLimitExceeded(message),
            ReplayError::Io(e) => Self::Io(e),
            ReplayError::Serialization(message) => Self::Io(std::io::Error::other(message)),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TerminalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_not_found_names_screenshot() {
        let err = TerminalError::PatternNotFound {
            pattern: "Goodbye".into(),
            timeout_ms: 200,
            screenshot: Some(PathBuf::from("shots/expect-failure.txt")),
        };
        assert_eq!(
            err.to_string(),
            "pattern \"Goodbye\" not found within 200ms (screenshot: shots/expect-failure.txt)"
        );
    }

    #[test]
    fn test_guard_errors_fold_in() {
        let rejected: TerminalError = GuardError::CommandRejected("fork bomb".into()).into();
        assert!(matches!(rejected, TerminalError::ValidationRejected(_)));
        assert!(rejected.is_rejection());

        let limited: TerminalError = GuardError::ResourceLimitExceeded {
            resource: "concurrent PTYs",
            limit: 2,
        }
        .into();
        assert!(matches!(limited, TerminalError::ResourceLimitExceeded(_)));
        assert!(!limited.is_rejection());
    }
}
