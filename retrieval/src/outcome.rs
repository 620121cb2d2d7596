//! Structured results returned across the pipeline boundary.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, RetrievalError};

/// What a failed operation reports to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error category.
    pub kind: ErrorKind,

    /// Human-readable message.
    pub message: String,
}

impl From<&RetrievalError> for ErrorReport {
    fn from(error: &RetrievalError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Success or failure of a pipeline operation, serialized as
/// `{"ok": true, "result": ...}` or `{"ok": false, "error": {"kind", "message"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome<T> {
    /// The operation succeeded.
    Ok {
        /// Always `true`.
        ok: bool,
        /// Operation result.
        result: T,
    },
    /// The operation failed.
    Err {
        /// Always `false`.
        ok: bool,
        /// What went wrong.
        error: ErrorReport,
    },
}

impl<T> Outcome<T> {
    /// Successful outcome.
    pub fn success(result: T) -> Self {
        Self::Ok { ok: true, result }
    }

    /// Failed outcome.
    pub fn failure(error: &RetrievalError) -> Self {
        Self::Err {
            ok: false,
            error: error.into(),
        }
    }

    /// Whether the operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

impl<T> From<crate::Result<T>> for Outcome<T> {
    fn from(result: crate::Result<T>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(e) => Self::failure(&e),
        }
    }
}
