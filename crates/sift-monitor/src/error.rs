//! Error types for directory monitoring.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using MonitorError
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors specific to monitor and watched-directory operations.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// A native notification could not be classified as added, removed or
    /// modified
    #[error("notification not handled: {kind} for {paths:?}")]
    NotHandledEvent { kind: String, paths: Vec<PathBuf> },

    /// The operation is not allowed in the monitor's current state
    #[error("cannot {operation} a monitor that is {state}")]
    InvalidState { operation: String, state: String },

    /// The watched root is missing or not a directory
    #[error("not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// The directory is already being watched
    #[error("already watching {path}")]
    AlreadyWatched { path: PathBuf },

    /// The native notification backend failed
    #[error("watch error on {path}: {reason}")]
    Watch { path: PathBuf, reason: String },

    /// An index or decoding error
    #[error(transparent)]
    Core(#[from] sift_core::SiftError),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    /// Check if this error comes from an unclassifiable notification
    pub fn is_not_handled(&self) -> bool {
        matches!(self, MonitorError::NotHandledEvent { .. })
    }

    /// Create a watch error
    pub fn watch(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        MonitorError::Watch {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MonitorError::InvalidState {
            operation: "start".to_string(),
            state: "stopped".to_string(),
        };
        assert_eq!(err.to_string(), "cannot start a monitor that is stopped");

        let err = MonitorError::NotHandledEvent {
            kind: "Other".to_string(),
            paths: vec![PathBuf::from("/w/a")],
        };
        assert!(err.is_not_handled());
        assert!(err.to_string().contains("Other"));
    }

    #[test]
    fn test_from_core_error() {
        let err: MonitorError = sift_core::SiftError::inconsistent("/w/a", "unknown").into();
        assert!(matches!(err, MonitorError::Core(_)));
        assert!(!err.is_not_handled());
    }
}
