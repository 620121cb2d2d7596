//! LLM error types.

use thiserror::Error;

use omni_common::CommonError;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur while talking to LLM backends.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Unknown provider, malformed model id or unregistered backend.
    #[error("invalid model configuration: {0}")]
    Config(String),

    /// Backend answered with a non-success status.
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    /// Network failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Backend answered with an envelope we could not read.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Structured output stayed malformed after every repair attempt.
    #[error("JSON repair failed after {attempts} attempts: {last_error}")]
    JsonRepairExhausted { attempts: usize, last_error: String },

    /// JSON serialization error.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input or interrupted request.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl LlmError {
    /// Whether the backend call itself failed.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            Self::ApiError { .. } | Self::Network(_) | Self::InvalidResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_provider_failure() {
        assert!(
            LlmError::ApiError {
                status: 502,
                message: "bad gateway".to_string()
            }
            .is_provider_failure()
        );
        assert!(LlmError::InvalidResponse("no choices".to_string()).is_provider_failure());
        assert!(!LlmError::Config("unknown provider".to_string()).is_provider_failure());
        assert!(
            !LlmError::JsonRepairExhausted {
                attempts: 10,
                last_error: "eof".to_string()
            }
            .is_provider_failure()
        );
        assert!(!LlmError::Common(CommonError::Cancelled).is_provider_failure());
    }
}
