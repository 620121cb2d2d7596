//! OpenAI Chat Completions client.
//!
//! Serves both the OpenAI cloud API and LM Studio, which exposes the same
//! wire format on a local port. Structured output uses function tools: the
//! arguments of the first tool call become the completion's structured
//! payload.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use omni_common::{ApproxTokenCounter, TokenCounter};

use crate::error::{LlmError, Result};
use crate::model::{ModelDescriptor, ProviderKind, openai_models};
use crate::provider::{Completion, CompletionRequest, LlmProvider, TokenUsage};

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default LM Studio server URL.
pub const LMSTUDIO_BASE_URL: &str = "http://localhost:1234/v1";

/// Client for OpenAI-compatible chat completion servers.
pub struct OpenAiCompatProvider {
    kind: ProviderKind,
    base_url: String,
    api_key: Option<String>,
    http: Client,
    counter: Arc<dyn TokenCounter>,
}

impl OpenAiCompatProvider {
    fn with_kind(kind: ProviderKind, base_url: &str) -> Self {
        Self {
            kind,
            base_url: base_url.to_string(),
            api_key: None,
            http: Client::new(),
            counter: Arc::new(ApproxTokenCounter::default()),
        }
    }

    /// Client for the OpenAI cloud API.
    pub fn openai() -> Self {
        Self::with_kind(ProviderKind::OpenAI, OPENAI_BASE_URL)
    }

    /// Client for a local LM Studio server.
    pub fn lmstudio() -> Self {
        Self::with_kind(ProviderKind::LmStudio, LMSTUDIO_BASE_URL)
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the tokenizer used for cost estimates.
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    /// Build the request body for the chat completions endpoint.
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages(),
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        if !request.functions.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .functions
                .iter()
                .map(|f| serde_json::json!({"type": "function", "function": f}))
                .collect();
            body["tools"] = serde_json::json!(tools);
            // A single function is forced so the model cannot answer in prose.
            body["tool_choice"] = match request.functions.as_slice() {
                [only] => serde_json::json!({"type": "function", "function": {"name": only.name}}),
                _ => serde_json::json!("auto"),
            };
        }

        if let Some(object) = body.as_object_mut() {
            for (key, value) in &request.extra {
                object.insert(key.clone(), value.clone());
            }
        }

        body
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        match (&self.api_key, self.kind) {
            (Some(key), _) => Ok(builder.bearer_auth(key)),
            (None, ProviderKind::OpenAI) => Err(LlmError::Config(
                "OpenAI API key is not configured".to_string(),
            )),
            (None, _) => Ok(builder),
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(LlmError::ApiError {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        debug!("Completion from {} with model {}", self.kind, request.model);

        let body = self.build_request_body(request);
        let builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        let response = check_status(self.authorized(builder)?.send().await?).await?;

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let message = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?
            .message;

        let structured_payload = message
            .tool_calls
            .into_iter()
            .next()
            .map(|call| call.function.arguments);

        let usage = api_response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Completion {
            text: message.content.unwrap_or_default(),
            usage,
            structured_payload,
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        if self.kind == ProviderKind::OpenAI {
            return Ok(openai_models());
        }

        let builder = self.http.get(format!("{}/models", self.base_url));
        let response = check_status(self.authorized(builder)?.send().await?).await?;
        let listing: ModelListing = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(listing
            .data
            .into_iter()
            .map(|m| ModelDescriptor::local(m.id, self.kind))
            .collect())
    }

    fn token_counter(&self) -> Arc<dyn TokenCounter> {
        Arc::clone(&self.counter)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: ToolCallFunction,
}

#[derive(Debug, Deserialize)]
struct ToolCallFunction {
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ModelListing {
    data: Vec<ModelListingEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelListingEntry {
    id: String,
}
