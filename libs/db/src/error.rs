//! Error types for the graph core.
//!
//! Absence is never an error: lookups return `Option`. Every variant here aborts
//! the in-flight operation and leaves timelines in their last fully-appended state.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A visibility expression could not be parsed. Never coerced to allow or deny.
    #[error("invalid visibility expression {expression:?} at byte {position}: {reason}")]
    VisibilityParse {
        expression: String,
        position: usize,
        reason: String,
    },

    /// A field was accessed that the current fetch hints did not load.
    #[error("missing fetch hint: {0} was not loaded")]
    MissingFetchHint(&'static str),

    /// Stored data does not have the shape the codec expects.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Stored graph metadata disagrees with the running code.
    #[error("graph metadata mismatch for {key}: stored {stored:?}, expected {expected:?}")]
    VersionMismatch {
        key: String,
        stored: String,
        expected: String,
    },

    /// Storage failure that survived the backend's bounded retry.
    #[error("backend I/O failure: {0:#}")]
    BackendIo(#[source] anyhow::Error),

    /// The caller asked for something that cannot be applied.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An async read or flush exceeded the caller's deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub(crate) fn integrity(message: impl Into<String>) -> Self {
        Error::Integrity(message.into())
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// True for failures worth retrying at the backend boundary.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::BackendIo(_))
    }
}
