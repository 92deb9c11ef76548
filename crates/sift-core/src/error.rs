//! Error types for Sift core operations.
//!
//! This module defines well-structured error types using `thiserror` for
//! library-level errors, while the change-handler boundary uses `anyhow` for
//! convenient error handling.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using SiftError
pub type Result<T> = std::result::Result<T, SiftError>;

/// Core error types for Sift operations.
///
/// These errors represent specific failure modes that callers may want to
/// handle differently (e.g., re-adding a file instead of modifying it).
#[derive(Error, Debug)]
pub enum SiftError {
    // === Index Errors ===
    /// An operation's precondition on index state was violated
    #[error("index is inconsistent for {path}: {reason}")]
    InconsistentIndex { path: PathBuf, reason: String },

    // === Decoder Errors ===
    /// A file could not be read or decoded into text
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // === Configuration Errors ===
    /// Configuration file parsing failed
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// Invalid exclusion pattern
    #[error("invalid pattern: {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // === I/O Errors ===
    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SiftError {
    /// Returns true if this error reports an index precondition violation
    pub fn is_inconsistency(&self) -> bool {
        matches!(self, SiftError::InconsistentIndex { .. })
    }

    /// Returns true if the file behind this error has simply gone away.
    ///
    /// A watched file may be deleted between the moment a change is detected
    /// and the moment its content is read.
    pub fn is_vanished_file(&self) -> bool {
        match self {
            SiftError::Decode { source, .. } | SiftError::Io(source) => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }

    /// Create an inconsistency error
    pub fn inconsistent(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SiftError::InconsistentIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a decode error
    pub fn decode(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SiftError::Decode {
            path: path.into(),
            source,
        }
    }
}
