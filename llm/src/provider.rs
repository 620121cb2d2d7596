//! The capability every LLM backend implements.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use omni_common::TokenCounter;

use crate::error::Result;
use crate::model::{ModelDescriptor, ProviderKind};

/// A function the model may answer with structured arguments for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Function name.
    pub name: String,

    /// What the function does.
    #[serde(default)]
    pub description: String,

    /// JSON schema of the arguments.
    pub parameters: serde_json::Value,
}

impl FunctionSpec {
    /// Create a function spec.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// One completion call, already resolved to a concrete model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Provider-specific model name.
    pub model: String,

    /// User prompt.
    pub prompt: String,

    /// System instruction.
    pub instruction: Option<String>,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Functions for structured output.
    pub functions: Vec<FunctionSpec>,

    /// Extra provider parameters merged into the request body.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CompletionRequest {
    /// Chat messages for this request: optional system message, then the prompt.
    pub fn messages(&self) -> Vec<serde_json::Value> {
        let mut messages = Vec::with_capacity(2);
        if let Some(instruction) = self.instruction.as_deref().filter(|i| !i.is_empty()) {
            messages.push(serde_json::json!({"role": "system", "content": instruction}));
        }
        messages.push(serde_json::json!({"role": "user", "content": self.prompt}));
        messages
    }
}

/// Token usage reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub prompt_tokens: u64,

    /// Completion tokens.
    pub completion_tokens: u64,

    /// Total tokens.
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Usage from prompt and completion counts.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Sum of two usages.
    pub fn combined(self, other: TokenUsage) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

/// Result of a completion call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Text answer.
    pub text: String,

    /// Token usage.
    pub usage: TokenUsage,

    /// Raw function-call arguments, when functions were requested.
    pub structured_payload: Option<String>,
}

/// Trait for LLM backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> ProviderKind;

    /// Run one completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Models this backend serves.
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>>;

    /// Tokenizer used to estimate request cost.
    fn token_counter(&self) -> Arc<dyn TokenCounter>;
}
