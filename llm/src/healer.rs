//! Bounded repair loop for malformed structured output.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use omni_common::RequestContext;

use crate::error::{LlmError, Result};
use crate::gateway::{LlmGateway, QueryRequest};

/// Instruction sent with every repair request.
pub const REPAIR_INSTRUCTION: &str = "The following text was meant to be a single JSON value but \
does not parse. Repair it and output only the corrected JSON, with no commentary and no code fences.";

/// Default number of parse attempts.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

/// Default pause between repair requests, in milliseconds.
pub const DEFAULT_PAUSE_MS: u64 = 500;

/// Repair loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealerConfig {
    /// Parse attempts before giving up.
    pub max_attempts: usize,

    /// Pause after each repair request, in milliseconds.
    pub pause_ms: u64,
}

impl Default for HealerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            pause_ms: DEFAULT_PAUSE_MS,
        }
    }
}

impl HealerConfig {
    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the pause between repair requests.
    pub fn with_pause_ms(mut self, pause_ms: u64) -> Self {
        self.pause_ms = pause_ms;
        self
    }
}

/// Asks the model to repair JSON until it parses or the budget runs out.
#[derive(Debug, Clone, Default)]
pub struct JsonSelfHealer {
    config: HealerConfig,
}

impl JsonSelfHealer {
    /// Create a healer.
    pub fn new(config: HealerConfig) -> Self {
        Self { config }
    }

    /// Loop settings.
    pub fn config(&self) -> &HealerConfig {
        &self.config
    }

    /// Parse `raw`, repairing it through `model_id` as needed.
    ///
    /// Repair requests go through [`LlmGateway::complete`], so a reply is
    /// never healed recursively. The last attempt is not followed by a
    /// repair request.
    pub async fn fix(
        &self,
        gateway: &LlmGateway,
        ctx: &RequestContext,
        raw: &str,
        model_id: &str,
    ) -> Result<serde_json::Value> {
        let max_attempts = self.config.max_attempts.max(1);
        let pause = Duration::from_millis(self.config.pause_ms);
        let mut candidate = raw.to_string();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match parse_candidate(&candidate) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Structured output repaired after {attempt} attempts");
                    }
                    return Ok(value);
                }
                Err(e) => last_error = e.to_string(),
            }

            if attempt == max_attempts {
                break;
            }

            debug!("Attempt {attempt}/{max_attempts} failed to parse: {last_error}");
            let request = QueryRequest::new(candidate, model_id).with_instruction(REPAIR_INSTRUCTION);
            candidate = gateway.complete(ctx, &request).await?.text;
            ctx.guard(tokio::time::sleep(pause)).await?;
        }

        warn!("Giving up on structured output after {max_attempts} attempts: {last_error}");
        Err(LlmError::JsonRepairExhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}

/// Parse one candidate, also trying it with escaped newlines normalized and
/// with a surrounding code fence removed. The first error is reported.
pub fn parse_candidate(candidate: &str) -> serde_json::Result<serde_json::Value> {
    let first_error = match serde_json::from_str(candidate) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let normalized = candidate.replace("\\n", "\n");
    if let Ok(value) = serde_json::from_str(&normalized) {
        return Ok(value);
    }

    if let Some(inner) = strip_code_fence(candidate)
        && let Ok(value) = serde_json::from_str(inner)
    {
        return Ok(value);
    }

    Err(first_error)
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let body = text.trim().strip_prefix("```")?.strip_suffix("```")?;
    // Drop an optional language tag on the opening line.
    let body = match body.split_once('\n') {
        Some((tag, rest)) if !tag.trim_start().starts_with(['{', '[']) => rest,
        _ => body,
    };
    Some(body.trim())
}
