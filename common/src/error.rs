//! Error types shared across the pipeline crates.

use thiserror::Error;

/// Result type alias for common operations.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised before any I/O happens, or when a request is interrupted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Empty or otherwise unusable input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Tokenizer could not be constructed.
    #[error("tokenizer unavailable: {0}")]
    Tokenizer(String),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The request deadline passed before the operation finished.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl CommonError {
    /// Whether this error means the request was interrupted by its caller.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}
