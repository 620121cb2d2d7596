//! Error types for the embeddings system.

use thiserror::Error;

use omni_common::CommonError;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur in the embeddings system.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Provider not configured.
    #[error("embedding provider not configured")]
    ProviderNotConfigured,

    /// Unknown embedder id.
    #[error("unknown embedder: {0}")]
    UnknownEmbedder(String),

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Persisting a cache entry failed.
    #[error("cache write failed: {0}")]
    CacheWrite(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid input or interrupted request.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl EmbeddingError {
    /// Whether this is a failure of the embedding backend itself (as
    /// opposed to storage, configuration or cancellation).
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            Self::ApiRequest(_)
                | Self::InvalidResponse(_)
                | Self::RateLimited { .. }
                | Self::Http(_)
        )
    }
}
