//! Uniform query entry point over every registered LLM backend.
//!
//! Requests address models by composite id. The gateway picks the backend,
//! downgrades large-context models when the request is small enough for the
//! cheaper sibling, and heals structured output before returning it.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use omni_common::RequestContext;

use crate::error::{LlmError, Result};
use crate::healer::JsonSelfHealer;
use crate::model::{ModelDescriptor, ModelId, ProviderKind, adjust_model, openai_model, openai_models};
use crate::provider::{Completion, CompletionRequest, FunctionSpec, LlmProvider, TokenUsage};

/// A query addressed to a composite model id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// User prompt.
    pub prompt: String,

    /// System instruction.
    pub instruction: Option<String>,

    /// Composite `"<name>|<provider>"` model id.
    pub model_id: String,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Functions for structured output.
    #[serde(default)]
    pub functions: Vec<FunctionSpec>,

    /// Extra provider parameters.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl QueryRequest {
    /// Create a query for `model_id`.
    pub fn new(prompt: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model_id: model_id.into(),
            ..Default::default()
        }
    }

    /// Set the system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Request structured output through these functions.
    pub fn with_functions(mut self, functions: Vec<FunctionSpec>) -> Self {
        self.functions = functions;
        self
    }

    /// Add an extra provider parameter.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Answer to a [`QueryRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Text answer.
    pub answer: String,

    /// Parsed structured output, when functions were requested.
    pub structured_args: Option<serde_json::Value>,

    /// Composite id of the model that actually answered.
    pub model: String,

    /// Token usage of the answering call.
    pub usage: TokenUsage,
}

/// Dispatches queries to registered providers.
#[derive(Default)]
pub struct LlmGateway {
    providers: HashMap<ProviderKind, Arc<dyn LlmProvider>>,
    healer: JsonSelfHealer,
}

impl LlmGateway {
    /// Gateway with no providers and the default healer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its kind, replacing any previous one.
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    /// Replace the structured output healer.
    pub fn with_healer(mut self, healer: JsonSelfHealer) -> Self {
        self.healer = healer;
        self
    }

    /// The structured output healer.
    pub fn healer(&self) -> &JsonSelfHealer {
        &self.healer
    }

    /// Provider registered for `kind`.
    pub fn provider(&self, kind: ProviderKind) -> Result<&Arc<dyn LlmProvider>> {
        self.providers
            .get(&kind)
            .ok_or_else(|| LlmError::Config(format!("provider {kind} is not registered")))
    }

    /// Token count of `text` under the tokenizer of `model_id`'s provider.
    pub fn count_tokens(&self, model_id: &str, text: &str) -> Result<usize> {
        let id = ModelId::parse(model_id)?;
        Ok(self.provider(id.provider)?.token_counter().count(text))
    }

    /// Model that will serve `request` after size-based adjustment.
    pub fn resolve_model(&self, request: &QueryRequest) -> Result<ModelId> {
        let id = ModelId::parse(&request.model_id)?;
        let counter = self.provider(id.provider)?.token_counter();
        let cost = counter.count(&request.prompt)
            + request
                .instruction
                .as_deref()
                .map_or(0, |instruction| counter.count(instruction));

        let name = adjust_model(&id.name, cost);
        if name != id.name {
            debug!("Request costs {cost} tokens, using {name} instead of {}", id.name);
        }
        Ok(ModelId::new(name, id.provider))
    }

    /// Run one completion without healing structured output.
    pub async fn complete(&self, ctx: &RequestContext, request: &QueryRequest) -> Result<Completion> {
        let (_, completion) = self.dispatch(ctx, request).await?;
        Ok(completion)
    }

    /// Run a query, healing structured output when functions were given.
    pub async fn query(&self, ctx: &RequestContext, request: &QueryRequest) -> Result<QueryResponse> {
        let (model, completion) = self.dispatch(ctx, request).await?;
        let model = model.to_string();

        let structured_args = if request.functions.is_empty() {
            None
        } else {
            let raw = completion
                .structured_payload
                .as_deref()
                .unwrap_or(&completion.text);
            Some(self.healer.fix(self, ctx, raw, &model).await?)
        };

        info!(
            "Query answered by {model} ({} tokens)",
            completion.usage.total_tokens
        );
        Ok(QueryResponse {
            answer: completion.text,
            structured_args,
            model,
            usage: completion.usage,
        })
    }

    async fn dispatch(
        &self,
        ctx: &RequestContext,
        request: &QueryRequest,
    ) -> Result<(ModelId, Completion)> {
        let model = self.resolve_model(request)?;
        let provider = self.provider(model.provider)?;

        let completion_request = CompletionRequest {
            model: model.name.clone(),
            prompt: request.prompt.clone(),
            instruction: request.instruction.clone(),
            temperature: request.temperature,
            functions: request.functions.clone(),
            extra: request.extra.clone(),
        };

        let completion = ctx.guard(provider.complete(&completion_request)).await??;
        Ok((model, completion))
    }

    /// Every model the gateway can serve: the static OpenAI table when an
    /// OpenAI provider is registered, plus whatever the registered local
    /// servers report. Unreachable servers are skipped.
    pub async fn model_choices(&self, ctx: &RequestContext) -> Result<Vec<ModelDescriptor>> {
        let mut local: Vec<&Arc<dyn LlmProvider>> = self
            .providers
            .values()
            .filter(|provider| provider.kind().is_local())
            .collect();
        local.sort_by_key(|provider| provider.kind().as_str());

        let probes = join_all(local.iter().map(|provider| provider.list_models()));
        let results = ctx.guard(probes).await?;

        let mut models = if self.providers.contains_key(&ProviderKind::OpenAI) {
            openai_models()
        } else {
            Vec::new()
        };
        for (provider, result) in local.iter().zip(results) {
            match result {
                Ok(found) => models.extend(found),
                Err(e) => warn!("Skipping {} models: {e}", provider.kind()),
            }
        }
        Ok(models)
    }

    /// Descriptor of `model_id`, used to size the packing budget.
    pub async fn descriptor(&self, ctx: &RequestContext, model_id: &str) -> Result<ModelDescriptor> {
        let id = ModelId::parse(model_id)?;
        if id.provider == ProviderKind::OpenAI {
            return openai_model(&id.name)
                .ok_or_else(|| LlmError::Config(format!("unknown OpenAI model: {}", id.name)));
        }

        let provider = self.provider(id.provider)?;
        match ctx.guard(provider.list_models()).await? {
            Ok(models) => Ok(models
                .into_iter()
                .find(|m| m.name == id.name)
                .unwrap_or_else(|| ModelDescriptor::local(id.name, id.provider))),
            Err(e) => {
                warn!("Could not probe {}: {e}", id.provider);
                Ok(ModelDescriptor::local(id.name, id.provider))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healer::HealerConfig;
    use crate::testing::ScriptedProvider;
    use omni_common::CommonError;
    use pretty_assertions::assert_eq;

    fn ctx() -> RequestContext {
        RequestContext::new("u")
    }

    fn gateway_with(provider: Arc<ScriptedProvider>) -> LlmGateway {
        LlmGateway::new()
            .with_provider(provider)
            .with_healer(JsonSelfHealer::new(HealerConfig::default().with_pause_ms(0)))
    }

    #[tokio::test]
    async fn test_downgrades_below_cutoff() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::OpenAI, ["ok"]));
        let gateway = gateway_with(Arc::clone(&provider));

        // The scripted provider counts one token per character.
        let request = QueryRequest::new("x".repeat(3499), "gpt-3.5-turbo-16k|openai");
        let response = gateway.query(&ctx(), &request).await.unwrap();

        assert_eq!(response.model, "gpt-3.5-turbo|openai");
        assert_eq!(provider.requests()[0].model, "gpt-3.5-turbo");
    }

    #[tokio::test]
    async fn test_keeps_large_model_above_cutoff() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::OpenAI, ["ok"]));
        let gateway = gateway_with(Arc::clone(&provider));

        let request = QueryRequest::new("x".repeat(7490), "gpt-4-32k|openai")
            .with_instruction("x".repeat(11));
        let response = gateway.query(&ctx(), &request).await.unwrap();

        assert_eq!(response.model, "gpt-4-32k|openai");
        assert_eq!(provider.requests()[0].model, "gpt-4-32k");
    }

    #[tokio::test]
    async fn test_never_upgrades() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::OpenAI, ["ok"]));
        let gateway = gateway_with(Arc::clone(&provider));

        let request = QueryRequest::new("x".repeat(100_000), "gpt-4|openai");
        let response = gateway.query(&ctx(), &request).await.unwrap();
        assert_eq!(response.model, "gpt-4|openai");
    }

    #[tokio::test]
    async fn test_config_errors() {
        let gateway = gateway_with(Arc::new(ScriptedProvider::new(
            ProviderKind::OpenAI,
            Vec::<&str>::new(),
        )));

        for model_id in ["gpt-4", "gpt-4|anthropic", "llama3|ollama"] {
            let err = gateway
                .query(&ctx(), &QueryRequest::new("hi", model_id))
                .await
                .unwrap_err();
            assert!(matches!(err, LlmError::Config(_)), "{model_id}: {err}");
        }
    }

    #[tokio::test]
    async fn test_structured_output_is_healed() {
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::Ollama,
            [r#"{"city": "Paris",}"#, r#"{"city": "Paris"}"#],
        ));
        let gateway = gateway_with(Arc::clone(&provider));

        let request = QueryRequest::new("Where is the Louvre?", "llama3|ollama").with_functions(
            vec![FunctionSpec::new(
                "locate",
                "City of a landmark",
                serde_json::json!({"type": "object"}),
            )],
        );
        let response = gateway.query(&ctx(), &request).await.unwrap();

        assert_eq!(
            response.structured_args,
            Some(serde_json::json!({"city": "Paris"}))
        );
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        // Repair calls carry no functions.
        assert!(requests[1].functions.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_propagates() {
        let gateway = gateway_with(Arc::new(ScriptedProvider::new(
            ProviderKind::OpenAI,
            Vec::<&str>::new(),
        )));
        let err = gateway
            .query(&ctx(), &QueryRequest::new("hi", "gpt-4|openai"))
            .await
            .unwrap_err();
        assert!(err.is_provider_failure());
    }

    #[tokio::test]
    async fn test_cancelled_query() {
        let gateway = gateway_with(Arc::new(ScriptedProvider::new(ProviderKind::OpenAI, ["ok"])));
        let ctx = ctx();
        ctx.cancellation_token().cancel();
        let err = gateway
            .query(&ctx, &QueryRequest::new("hi", "gpt-4|openai"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Common(CommonError::Cancelled)));
    }

    #[tokio::test]
    async fn test_model_choices_skips_failed_probe() {
        let ollama = ScriptedProvider::new(ProviderKind::Ollama, Vec::<&str>::new()).with_models(
            Some(vec![ModelDescriptor::local("llama3", ProviderKind::Ollama)]),
        );
        let lmstudio =
            ScriptedProvider::new(ProviderKind::LmStudio, Vec::<&str>::new()).with_models(None);
        let gateway = LlmGateway::new()
            .with_provider(Arc::new(ollama))
            .with_provider(Arc::new(lmstudio));

        let models = gateway.model_choices(&ctx()).await.unwrap();
        let ids: Vec<ModelId> = models.iter().map(ModelDescriptor::id).collect();
        assert_eq!(ids, vec![ModelId::new("llama3", ProviderKind::Ollama)]);
    }

    #[tokio::test]
    async fn test_model_choices_lists_openai_only_when_registered() {
        let ollama = Arc::new(
            ScriptedProvider::new(ProviderKind::Ollama, Vec::<&str>::new()).with_models(Some(
                vec![ModelDescriptor::local("llama3", ProviderKind::Ollama)],
            )),
        );
        let without = LlmGateway::new().with_provider(ollama.clone());
        let models = without.model_choices(&ctx()).await.unwrap();
        assert!(models.iter().all(|m| m.provider != ProviderKind::OpenAI));

        let with = LlmGateway::new()
            .with_provider(ollama)
            .with_provider(Arc::new(ScriptedProvider::new(
                ProviderKind::OpenAI,
                Vec::<&str>::new(),
            )));
        let models = with.model_choices(&ctx()).await.unwrap();
        assert_eq!(models.len(), openai_models().len() + 1);
        assert_eq!(
            models.last().map(ModelDescriptor::id),
            Some(ModelId::new("llama3", ProviderKind::Ollama))
        );
    }

    #[tokio::test]
    async fn test_descriptor() {
        let ollama = ScriptedProvider::new(ProviderKind::Ollama, Vec::<&str>::new()).with_models(
            Some(vec![ModelDescriptor::new(
                "llama3",
                ProviderKind::Ollama,
                "Llama 3",
                8192,
            )]),
        );
        let gateway = LlmGateway::new().with_provider(Arc::new(ollama));

        let gpt = gateway.descriptor(&ctx(), "gpt-4-32k|openai").await.unwrap();
        assert_eq!(gpt.context_size, 32768);

        let llama = gateway.descriptor(&ctx(), "llama3|ollama").await.unwrap();
        assert_eq!(llama.context_size, 8192);

        let unknown = gateway.descriptor(&ctx(), "phi|ollama").await.unwrap();
        assert_eq!(unknown, ModelDescriptor::local("phi", ProviderKind::Ollama));

        assert!(matches!(
            gateway.descriptor(&ctx(), "gpt-2|openai").await,
            Err(LlmError::Config(_))
        ));
    }
}
