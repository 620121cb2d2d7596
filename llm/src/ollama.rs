//! Ollama chat client.
//!
//! Ollama has no function calling, so structured output is requested with
//! `format: "json"` and the function schemas are appended to the system
//! message. The reply content is then the structured payload.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use omni_common::{ApproxTokenCounter, TokenCounter};

use crate::error::{LlmError, Result};
use crate::model::{ModelDescriptor, ProviderKind};
use crate::provider::{Completion, CompletionRequest, FunctionSpec, LlmProvider, TokenUsage};

/// Default Ollama server URL.
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Client for a local Ollama server.
pub struct OllamaProvider {
    base_url: String,
    http: Client,
    counter: Arc<dyn TokenCounter>,
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaProvider {
    /// Client for the default local server.
    pub fn new() -> Self {
        Self {
            base_url: OLLAMA_BASE_URL.to_string(),
            http: Client::new(),
            counter: Arc::new(ApproxTokenCounter::default()),
        }
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

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut messages = Vec::with_capacity(2);
        let system = system_message(request.instruction.as_deref(), &request.functions);
        if !system.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": request.prompt}));

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
        });

        if let Some(temperature) = request.temperature {
            body["options"] = serde_json::json!({"temperature": temperature});
        }
        if !request.functions.is_empty() {
            body["format"] = serde_json::json!("json");
        }

        if let Some(object) = body.as_object_mut() {
            for (key, value) in &request.extra {
                object.insert(key.clone(), value.clone());
            }
        }

        body
    }
}

fn system_message(instruction: Option<&str>, functions: &[FunctionSpec]) -> String {
    let mut system = instruction.unwrap_or_default().to_string();
    for function in functions {
        if !system.is_empty() {
            system.push_str("\n\n");
        }
        system.push_str(&format!(
            "Respond only with a JSON object matching the arguments of `{}` ({}). Schema:\n{}",
            function.name, function.description, function.parameters
        ));
    }
    system
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
impl LlmProvider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        debug!("Ollama completion with model {}", request.model);

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&self.build_request_body(request))
            .send()
            .await?;
        let response = check_status(response).await?;

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let structured_payload =
            (!request.functions.is_empty()).then(|| chat.message.content.clone());

        Ok(Completion {
            text: chat.message.content,
            usage: TokenUsage::new(chat.prompt_eval_count, chat.eval_count),
            structured_payload,
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;
        let tags: TagsResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| ModelDescriptor::local(m.name, ProviderKind::Ollama))
            .collect())
    }

    fn token_counter(&self) -> Arc<dyn TokenCounter> {
        Arc::clone(&self.counter)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "llama3".to_string(),
            prompt: "Why is the sky blue?".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_request_body_with_functions() {
        let mut request = request();
        request.instruction = Some("Be precise.".to_string());
        request.temperature = Some(0.2);
        request.functions = vec![FunctionSpec::new(
            "answer",
            "Final answer",
            serde_json::json!({"type": "object"}),
        )];

        let body = OllamaProvider::new().build_request_body(&request);
        assert_eq!(body["format"], "json");
        assert_eq!(body["stream"], false);
        let system = body["messages"][0]["content"].as_str().unwrap();
        assert!(system.starts_with("Be precise."));
        assert!(system.contains("`answer`"));
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn test_request_body_plain() {
        let body = OllamaProvider::new().build_request_body(&request());
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert!(body.get("format").is_none());
        assert!(body.get("options").is_none());
    }

    #[tokio::test]
    async fn test_complete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"model": "llama3", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3",
                "message": {"role": "assistant", "content": "Rayleigh scattering."},
                "done": true,
                "prompt_eval_count": 9,
                "eval_count": 4
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OllamaProvider::new().with_base_url(server.uri());
        let completion = provider.complete(&request()).await.unwrap();
        assert_eq!(completion.text, "Rayleigh scattering.");
        assert_eq!(completion.usage, TokenUsage::new(9, 4));
        assert_eq!(completion.structured_payload, None);
    }

    #[tokio::test]
    async fn test_complete_structured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "{\"a\": 1}"}
            })))
            .mount(&server)
            .await;

        let mut request = request();
        request.functions = vec![FunctionSpec::new("f", "", serde_json::json!({}))];
        let provider = OllamaProvider::new().with_base_url(server.uri());
        let completion = provider.complete(&request).await.unwrap();
        assert_eq!(completion.structured_payload.as_deref(), Some("{\"a\": 1}"));
    }

    #[tokio::test]
    async fn test_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new().with_base_url(server.uri());
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::ApiError { status: 404, .. }));
        assert!(err.is_provider_failure());
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "llama3:8b", "size": 1}, {"name": "mistral"}]
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new().with_base_url(server.uri());
        let models = provider.list_models().await.unwrap();
        assert_eq!(
            models,
            vec![
                ModelDescriptor::local("llama3:8b", ProviderKind::Ollama),
                ModelDescriptor::local("mistral", ProviderKind::Ollama),
            ]
        );
    }
}
