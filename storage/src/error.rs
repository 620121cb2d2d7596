//! Error types for the storage collaborators.

use thiserror::Error;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the object store or key-value database.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No object stored under this ticket.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// Write carried a revision that is no longer current.
    #[error("stale revision for {key}: expected {expected}, current {current}")]
    Conflict {
        key: String,
        expected: u64,
        current: u64,
    },

    /// Failed to read from the backing store.
    #[error("failed to read: {0}")]
    Read(String),

    /// Failed to write to the backing store.
    #[error("failed to write: {0}")]
    Write(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether a retry with a fresh revision may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
