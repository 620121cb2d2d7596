//! Model addressing and the static model table.
//!
//! Models are addressed by the composite id `"<name>|<provider>"`. Cloud
//! models come from a fixed table; local servers are probed at runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};

/// Context size assumed for local models the server does not describe.
pub const DEFAULT_LOCAL_CONTEXT_SIZE: usize = 4096;

/// LLM backends the gateway can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI cloud API.
    OpenAI,
    /// Local Ollama server.
    Ollama,
    /// Local LM Studio server (OpenAI-compatible).
    LmStudio,
}

impl ProviderKind {
    /// Provider name as used in composite ids.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Ollama => "ollama",
            Self::LmStudio => "lmstudio",
        }
    }

    /// Whether the provider runs locally and must be probed for models.
    pub fn is_local(self) -> bool {
        !matches!(self, Self::OpenAI)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "lmstudio" => Ok(Self::LmStudio),
            other => Err(LlmError::Config(format!("unknown provider: {other}"))),
        }
    }
}

/// A parsed `"<name>|<provider>"` model id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelId {
    /// Provider-specific model name.
    pub name: String,

    /// Backend serving the model.
    pub provider: ProviderKind,
}

impl ModelId {
    /// Create a model id.
    pub fn new(name: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }

    /// Parse a composite id. The model name may itself contain `|`; the
    /// provider is whatever follows the last one.
    pub fn parse(id: &str) -> Result<Self> {
        let (name, provider) = id
            .rsplit_once('|')
            .ok_or_else(|| LlmError::Config(format!("malformed model id: {id}")))?;
        if name.is_empty() {
            return Err(LlmError::Config(format!("malformed model id: {id}")));
        }
        Ok(Self::new(name, provider.parse()?))
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.name, self.provider)
    }
}

/// A model the gateway can dispatch to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Provider-specific model name.
    pub name: String,

    /// Backend serving the model.
    pub provider: ProviderKind,

    /// Human-readable title.
    pub title: String,

    /// Maximum context window, in tokens.
    pub context_size: usize,
}

impl ModelDescriptor {
    /// Create a descriptor.
    pub fn new(
        name: impl Into<String>,
        provider: ProviderKind,
        title: impl Into<String>,
        context_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            title: title.into(),
            context_size,
        }
    }

    /// Descriptor for a model found on a local server.
    pub fn local(name: impl Into<String>, provider: ProviderKind) -> Self {
        let name = name.into();
        let title = format!("{name} ({provider})");
        Self::new(name, provider, title, DEFAULT_LOCAL_CONTEXT_SIZE)
    }

    /// Composite id of this model.
    pub fn id(&self) -> ModelId {
        ModelId::new(self.name.clone(), self.provider)
    }
}

/// OpenAI chat models with known context sizes.
const OPENAI_MODELS: &[(&str, &str, usize)] = &[
    ("gpt-3.5-turbo", "GPT-3.5 Turbo", 4096),
    ("gpt-3.5-turbo-16k", "GPT-3.5 Turbo 16k", 16384),
    ("gpt-4", "GPT-4", 8192),
    ("gpt-4-32k", "GPT-4 32k", 32768),
    ("gpt-4-turbo", "GPT-4 Turbo", 128_000),
    ("gpt-4o", "GPT-4o", 128_000),
    ("gpt-4o-mini", "GPT-4o mini", 128_000),
];

/// The static OpenAI model table.
pub fn openai_models() -> Vec<ModelDescriptor> {
    OPENAI_MODELS
        .iter()
        .map(|(name, title, context_size)| {
            ModelDescriptor::new(*name, ProviderKind::OpenAI, *title, *context_size)
        })
        .collect()
}

/// Look up an OpenAI model in the static table.
pub fn openai_model(name: &str) -> Option<ModelDescriptor> {
    openai_models().into_iter().find(|m| m.name == name)
}

/// A large-context model with a cheaper small-context sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelFamily {
    /// Large-context member.
    pub large: &'static str,

    /// Small-context member.
    pub small: &'static str,

    /// Requests costing fewer tokens than this fit the small member.
    pub cutoff: usize,
}

/// Known model families.
pub const MODEL_FAMILIES: &[ModelFamily] = &[
    ModelFamily {
        large: "gpt-3.5-turbo-16k",
        small: "gpt-3.5-turbo",
        cutoff: 3500,
    },
    ModelFamily {
        large: "gpt-4-32k",
        small: "gpt-4",
        cutoff: 7500,
    },
];

/// Pick the model to use for a request costing `cost` tokens: the small
/// member of a family when the large one was asked for and the request
/// fits. Never upgrades.
pub fn adjust_model(name: &str, cost: usize) -> &str {
    MODEL_FAMILIES
        .iter()
        .find(|family| family.large == name && cost < family.cutoff)
        .map_or(name, |family| family.small)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_model_id() {
        let id = ModelId::parse("gpt-4|openai").unwrap();
        assert_eq!(id, ModelId::new("gpt-4", ProviderKind::OpenAI));
        assert_eq!(id.to_string(), "gpt-4|openai");

        let id = ModelId::parse("llama3:8b|ollama").unwrap();
        assert_eq!(id.provider, ProviderKind::Ollama);
        assert_eq!(id.name, "llama3:8b");

        let id = ModelId::parse("qwen|v2|lmstudio").unwrap();
        assert_eq!(id.name, "qwen|v2");
        assert_eq!(id.provider, ProviderKind::LmStudio);
    }

    #[test]
    fn test_parse_model_id_errors() {
        assert!(matches!(ModelId::parse("gpt-4"), Err(LlmError::Config(_))));
        assert!(matches!(ModelId::parse("|openai"), Err(LlmError::Config(_))));
        assert!(matches!(
            ModelId::parse("gpt-4|anthropic"),
            Err(LlmError::Config(_))
        ));
    }

    #[test]
    fn test_adjust_model_downgrades_below_cutoff() {
        assert_eq!(adjust_model("gpt-3.5-turbo-16k", 3499), "gpt-3.5-turbo");
        assert_eq!(adjust_model("gpt-3.5-turbo-16k", 3500), "gpt-3.5-turbo-16k");
        assert_eq!(adjust_model("gpt-3.5-turbo-16k", 3501), "gpt-3.5-turbo-16k");
        assert_eq!(adjust_model("gpt-4-32k", 7499), "gpt-4");
        assert_eq!(adjust_model("gpt-4-32k", 7501), "gpt-4-32k");
    }

    #[test]
    fn test_adjust_model_never_upgrades() {
        assert_eq!(adjust_model("gpt-3.5-turbo", 100_000), "gpt-3.5-turbo");
        assert_eq!(adjust_model("gpt-4", 0), "gpt-4");
        assert_eq!(adjust_model("llama3", 10), "llama3");
    }

    #[test]
    fn test_openai_table() {
        let model = openai_model("gpt-4-32k").unwrap();
        assert_eq!(model.context_size, 32768);
        assert_eq!(model.id().to_string(), "gpt-4-32k|openai");
        assert!(openai_model("gpt-2").is_none());
        for family in MODEL_FAMILIES {
            assert!(openai_model(family.large).is_some());
            assert!(openai_model(family.small).is_some());
        }
    }

    #[test]
    fn test_local_descriptor() {
        let model = ModelDescriptor::local("mistral", ProviderKind::Ollama);
        assert_eq!(model.title, "mistral (ollama)");
        assert_eq!(model.context_size, DEFAULT_LOCAL_CONTEXT_SIZE);
    }
}
