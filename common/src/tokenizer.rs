//! Token counting.
//!
//! Chunk token counts, packing budgets and model-size selection all go
//! through a [`TokenCounter`]. OpenAI model families use the exact
//! `cl100k_base` BPE; local models fall back to a character heuristic.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::error::{CommonError, Result};

/// Counts tokens of a text the way a given model family does.
pub trait TokenCounter: Send + Sync {
    /// Name of this tokenizer.
    fn name(&self) -> &str;

    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize;

    /// Identifies this counter's behaviour, including any parameters, so
    /// cached token counts can be keyed on it.
    fn fingerprint(&self) -> String {
        self.name().to_string()
    }
}

/// Which tokenizer to use for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    /// OpenAI `cl100k_base` BPE.
    Cl100k,
    /// Roughly four characters per token.
    #[default]
    Approximate,
}

impl TokenizerKind {
    /// Build the counter for this kind.
    pub fn build(self) -> Result<Arc<dyn TokenCounter>> {
        Ok(match self {
            Self::Cl100k => Arc::new(TiktokenCounter::cl100k()?),
            Self::Approximate => Arc::new(ApproxTokenCounter::default()),
        })
    }
}

/// Exact BPE token counts.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    /// Load the `cl100k_base` encoding.
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| CommonError::Tokenizer(e.to_string()))?;
        debug!("Loaded cl100k_base encoding");
        Ok(Self { bpe })
    }
}

impl fmt::Debug for TiktokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TiktokenCounter").finish_non_exhaustive()
    }
}

impl TokenCounter for TiktokenCounter {
    fn name(&self) -> &str {
        "cl100k_base"
    }

    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Character-based estimate: `ceil(chars / chars_per_token)`.
#[derive(Debug, Clone, Copy)]
pub struct ApproxTokenCounter {
    chars_per_token: usize,
}

impl ApproxTokenCounter {
    /// Create an estimator with the given ratio (clamped to at least one).
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for ApproxTokenCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for ApproxTokenCounter {
    fn name(&self) -> &str {
        "approximate"
    }

    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }

    fn fingerprint(&self) -> String {
        format!("approximate:{}", self.chars_per_token)
    }
}
