//! Error types for splitting and indexing.

use thiserror::Error;

use omni_common::CommonError;
use omni_embeddings::EmbeddingError;
use omni_storage::StorageError;

/// Result type alias for indexing operations.
pub type Result<T> = std::result::Result<T, IndexingError>;

/// Errors that can occur while splitting, indexing or resolving documents.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Invalid splitter or indexer configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Query against an index that does not exist.
    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// An index entry points at a document that is no longer stored.
    #[error("index references missing document {document_id} (ticket {ticket})")]
    DanglingReference { ticket: String, document_id: String },

    /// A stored document blob could not be decoded.
    #[error("stored document {ticket} is corrupt: {reason}")]
    CorruptDocument { ticket: String, reason: String },

    /// Persisting an indexing result failed.
    #[error("cache write failed: {0}")]
    CacheWrite(String),

    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input or interrupted request.
    #[error(transparent)]
    Common(#[from] CommonError),
}
