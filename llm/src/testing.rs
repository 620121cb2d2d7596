//! In-process provider with canned replies for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use omni_common::{ApproxTokenCounter, TokenCounter};

use crate::error::{LlmError, Result};
use crate::model::{ModelDescriptor, ProviderKind};
use crate::provider::{Completion, CompletionRequest, LlmProvider, TokenUsage};

/// Replays scripted replies in order and records every request.
pub(crate) struct ScriptedProvider {
    kind: ProviderKind,
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
    models: Option<Vec<ModelDescriptor>>,
    counter: Arc<dyn TokenCounter>,
}

impl ScriptedProvider {
    pub(crate) fn new<I, S>(kind: ProviderKind, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
            models: Some(Vec::new()),
            counter: Arc::new(ApproxTokenCounter::new(1)),
        }
    }

    /// Models reported by `list_models`; `None` makes the probe fail.
    pub(crate) fn with_models(mut self, models: Option<Vec<ModelDescriptor>>) -> Self {
        self.models = models;
        self
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.requests.lock().unwrap().push(request.clone());
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("script exhausted".to_string()))?;
        let structured_payload = (!request.functions.is_empty()).then(|| text.clone());
        Ok(Completion {
            text,
            usage: TokenUsage::new(1, 1),
            structured_payload,
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        self.models.clone().ok_or_else(|| LlmError::ApiError {
            status: 503,
            message: "server offline".to_string(),
        })
    }

    fn token_counter(&self) -> Arc<dyn TokenCounter> {
        Arc::clone(&self.counter)
    }
}
