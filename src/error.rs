//! Error types for the engine.
//!
//! The taxonomy is deliberately small:
//! - [`EngineError::Io`] — a filesystem problem on a specific path.
//!   During scanning these are *local*: the offending item is flagged and
//!   the scan continues. Only facade-level operations surface them.
//! - [`EngineError::Format`] — a malformed results file. The load is
//!   aborted and the existing tree is left untouched.
//! - [`EngineError::Cancelled`] — returned (never thrown) by blocking
//!   queue operations; workers propagate it by early return.
//! - [`EngineError::Invariant`] — an internal consistency failure.
//!   Fatal in debug builds via `debug_assert!`; logged and tolerated in
//!   release (the affected subtree is treated as done-with-partial).

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// I/O failure on a specific path.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed results file (bad header, missing column, bad row).
    #[error("format error at line {line}: {reason}")]
    Format { line: usize, reason: String },

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,

    /// An internal invariant did not hold.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl EngineError {
    /// Attach a path to a raw `std::io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Construct a format error for the given 1-based line number.
    pub fn format(line: usize, reason: impl Into<String>) -> Self {
        Self::Format {
            line,
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Marker returned by blocking queue operations when cancellation was
/// requested. Kept separate from [`EngineError`] so queue call sites can
/// match on it without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl From<Cancelled> for EngineError {
    fn from(_: Cancelled) -> Self {
        EngineError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_carries_path() {
        let err = EngineError::io(
            "/some/dir",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/some/dir"));
    }

    #[test]
    fn cancelled_converts() {
        let err: EngineError = Cancelled.into();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
