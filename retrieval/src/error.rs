//! Error types for the pipeline boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use omni_common::CommonError;
use omni_embeddings::EmbeddingError;
use omni_indexing::IndexingError;
use omni_llm::LlmError;
use omni_storage::StorageError;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur anywhere in the pipeline.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("invalid configuration file: {0}")]
    ConfigFile(#[from] toml::de::Error),

    /// Indexing error.
    #[error(transparent)]
    Indexing(#[from] IndexingError),

    /// Embedding error.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// LLM error.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Invalid input or interrupted request.
    #[error(transparent)]
    Common(#[from] CommonError),
}

/// Caller-facing error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Empty or missing text, query or document list.
    InvalidInput,
    /// Unknown splitter, embedder or model.
    ConfigError,
    /// An embedding or LLM backend call failed.
    ProviderError,
    /// Stored data could not be read.
    CacheReadError,
    /// Results could not be persisted.
    CacheWriteError,
    /// Structured output stayed malformed.
    JsonRepairExhausted,
    /// Query against an unknown index.
    IndexNotFound,
    /// The request was cancelled or ran past its deadline.
    Cancelled,
}

impl RetrievalError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::ConfigFile(_) => ErrorKind::ConfigError,
            Self::Indexing(e) => indexing_kind(e),
            Self::Embedding(e) => embedding_kind(e),
            Self::Llm(e) => llm_kind(e),
            Self::Storage(e) => storage_kind(e),
            Self::Common(e) => common_kind(e),
        }
    }
}

fn common_kind(error: &CommonError) -> ErrorKind {
    match error {
        CommonError::InvalidInput(_) => ErrorKind::InvalidInput,
        CommonError::Tokenizer(_) => ErrorKind::ConfigError,
        CommonError::Cancelled | CommonError::DeadlineExceeded => ErrorKind::Cancelled,
    }
}

fn storage_kind(error: &StorageError) -> ErrorKind {
    match error {
        StorageError::ObjectNotFound(_) | StorageError::Read(_) | StorageError::Serialization(_) => {
            ErrorKind::CacheReadError
        }
        StorageError::Conflict { .. } | StorageError::Write(_) => ErrorKind::CacheWriteError,
    }
}

fn embedding_kind(error: &EmbeddingError) -> ErrorKind {
    match error {
        EmbeddingError::ProviderNotConfigured | EmbeddingError::UnknownEmbedder(_) => {
            ErrorKind::ConfigError
        }
        EmbeddingError::ApiRequest(_)
        | EmbeddingError::InvalidResponse(_)
        | EmbeddingError::RateLimited { .. }
        | EmbeddingError::DimensionMismatch { .. }
        | EmbeddingError::Http(_) => ErrorKind::ProviderError,
        EmbeddingError::CacheWrite(_) => ErrorKind::CacheWriteError,
        EmbeddingError::Serialization(_) => ErrorKind::CacheReadError,
        EmbeddingError::Common(e) => common_kind(e),
    }
}

fn indexing_kind(error: &IndexingError) -> ErrorKind {
    match error {
        IndexingError::Config(_) => ErrorKind::ConfigError,
        IndexingError::IndexNotFound(_) => ErrorKind::IndexNotFound,
        IndexingError::DanglingReference { .. }
        | IndexingError::CorruptDocument { .. }
        | IndexingError::Serialization(_) => ErrorKind::CacheReadError,
        IndexingError::CacheWrite(_) => ErrorKind::CacheWriteError,
        IndexingError::Embedding(e) => embedding_kind(e),
        IndexingError::Storage(e) => storage_kind(e),
        IndexingError::Common(e) => common_kind(e),
    }
}

fn llm_kind(error: &LlmError) -> ErrorKind {
    match error {
        LlmError::Config(_) => ErrorKind::ConfigError,
        LlmError::ApiError { .. }
        | LlmError::Network(_)
        | LlmError::InvalidResponse(_)
        | LlmError::Json(_) => ErrorKind::ProviderError,
        LlmError::JsonRepairExhausted { .. } => ErrorKind::JsonRepairExhausted,
        LlmError::Common(e) => common_kind(e),
    }
}
