//! # Omni LLM
//!
//! One query surface over several LLM backends.
//!
//! - **LlmGateway**: routes `"<name>|<provider>"` model ids to a registered
//!   [`LlmProvider`], downgrading large-context models for small requests
//! - **Providers**: OpenAI and LM Studio share [`OpenAiCompatProvider`];
//!   Ollama has its own [`OllamaProvider`]
//! - **JsonSelfHealer**: bounded repair loop for malformed structured output
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use omni_llm::{LlmGateway, OllamaProvider, QueryRequest};
//!
//! let gateway = LlmGateway::new().with_provider(Arc::new(OllamaProvider::new()));
//! let response = gateway
//!     .query(&ctx, &QueryRequest::new("Summarize chapter one", "llama3|ollama"))
//!     .await?;
//! println!("{}", response.answer);
//! ```

pub mod error;
pub mod gateway;
pub mod healer;
pub mod model;
pub mod ollama;
pub mod openai;
pub mod provider;

#[cfg(test)]
mod testing;

pub use error::{LlmError, Result};
pub use gateway::{LlmGateway, QueryRequest, QueryResponse};
pub use healer::{HealerConfig, JsonSelfHealer, REPAIR_INSTRUCTION};
pub use model::{
    DEFAULT_LOCAL_CONTEXT_SIZE, MODEL_FAMILIES, ModelDescriptor, ModelFamily, ModelId,
    ProviderKind, adjust_model, openai_model, openai_models,
};
pub use ollama::OllamaProvider;
pub use openai::OpenAiCompatProvider;
pub use provider::{Completion, CompletionRequest, FunctionSpec, LlmProvider, TokenUsage};
