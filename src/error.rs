//! Error types for the observable dictionary.

use thiserror::Error;

/// Main error type for dictionary operations.
///
/// Errors are `Clone` because a single fatal error is captured once,
/// broadcast to every subscriber, and replayed to late subscribers.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DictionaryError {
    #[error("Merge failed for key {key}: {reason}")]
    MergeFailure { key: String, reason: String },

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Dictionary has been disposed")]
    Disposed,

    #[error("Failed to start worker thread: {0}")]
    Spawn(String),
}

impl DictionaryError {
    /// Whether this error permanently stops the dictionary.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DictionaryError::MergeFailure { .. }
                | DictionaryError::Upstream(_)
                | DictionaryError::Disposed
        )
    }
}

impl From<std::io::Error> for DictionaryError {
    fn from(e: std::io::Error) -> Self {
        DictionaryError::Spawn(e.to_string())
    }
}

/// Result type for dictionary operations.
pub type Result<T> = std::result::Result<T, DictionaryError>;
