//! Configuration for the document QA pipeline.
//!
//! Every section has defaults, so a TOML file only needs the keys it
//! changes:
//!
//! ```toml
//! [embedding]
//! embedder = "nomic-embed-text|ollama"
//!
//! [splitter]
//! model = "CodeSplitter_rust"
//! chunk_size = 800
//!
//! [query]
//! model_id = "llama3|ollama"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use omni_common::{TokenCounter, TokenizerKind};
use omni_embeddings::{
    EmbedderBackend, EmbeddingProvider, OllamaEmbeddingProvider, OpenAIProvider, parse_embedder_id,
};
use omni_indexing::IndexerConfig;
use omni_indexing::splitter::RECURSIVE_CHARACTER_SPLITTER;
use omni_llm::{HealerConfig, JsonSelfHealer, LlmGateway, OllamaProvider, OpenAiCompatProvider};

use crate::error::{Result, RetrievalError};

/// Default instruction for answering from retrieved context.
pub const DEFAULT_INSTRUCTION: &str = "Answer the question using only the provided context. \
If the context does not contain the answer, say so.";

/// Configuration for the whole pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Where the filesystem stores live.
    pub storage: StorageConfig,

    /// Embedding backend and chunk tokenizer.
    pub embedding: EmbeddingConfig,

    /// Text splitting.
    pub splitter: SplitterConfig,

    /// Chunk indexing.
    pub indexing: IndexingConfig,

    /// Retrieval and answering.
    pub query: QueryConfig,

    /// Structured output repair.
    pub healer: HealerConfig,

    /// Backend endpoints and credentials.
    pub providers: ProvidersConfig,
}

impl PipelineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RetrievalError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Set the storage root.
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage.root = root.into();
        self
    }

    /// Set the embedding configuration.
    pub fn with_embedding(mut self, config: EmbeddingConfig) -> Self {
        self.embedding = config;
        self
    }

    /// Set the splitter configuration.
    pub fn with_splitter(mut self, config: SplitterConfig) -> Self {
        self.splitter = config;
        self
    }

    /// Set the indexing configuration.
    pub fn with_indexing(mut self, config: IndexingConfig) -> Self {
        self.indexing = config;
        self
    }

    /// Set the query configuration.
    pub fn with_query(mut self, config: QueryConfig) -> Self {
        self.query = config;
        self
    }

    /// Set the healer configuration.
    pub fn with_healer(mut self, config: HealerConfig) -> Self {
        self.healer = config;
        self
    }

    /// Set the provider configuration.
    pub fn with_providers(mut self, config: ProvidersConfig) -> Self {
        self.providers = config;
        self
    }

    /// Indexer settings derived from the splitter and indexing sections.
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig::default()
            .with_splitter(self.splitter.model.clone())
            .with_chunking(self.splitter.chunk_size, self.splitter.chunk_overlap)
            .with_batch_size(self.indexing.batch_size)
    }
}

/// Filesystem store location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory; key-value data and objects live underneath.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_dir().unwrap_or_default().join("omni"),
        }
    }
}

/// Embedding backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Composite `"<model>|<provider>"` embedder id.
    pub embedder: String,

    /// Tokenizer used for chunk token counts.
    pub tokenizer: TokenizerKind,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            embedder: "text-embedding-3-small|openai".to_string(),
            tokenizer: TokenizerKind::Cl100k,
        }
    }
}

impl EmbeddingConfig {
    /// Set the embedder id.
    pub fn with_embedder(mut self, embedder: impl Into<String>) -> Self {
        self.embedder = embedder.into();
        self
    }

    /// Set the chunk tokenizer.
    pub fn with_tokenizer(mut self, tokenizer: TokenizerKind) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Build the configured embedding backend.
    pub fn build_provider(&self, providers: &ProvidersConfig) -> Result<Arc<dyn EmbeddingProvider>> {
        let (model, backend) = parse_embedder_id(&self.embedder)?;
        Ok(match backend {
            EmbedderBackend::OpenAI => {
                let mut provider = OpenAIProvider::new().with_model(model);
                if let Some(key) = providers.openai_api_key() {
                    provider = provider.with_api_key(key);
                }
                if let Some(url) = &providers.openai_base_url {
                    provider = provider.with_base_url(url.clone());
                }
                Arc::new(provider)
            }
            EmbedderBackend::Ollama => {
                Arc::new(OllamaEmbeddingProvider::new(model).with_base_url(providers.ollama_url.clone()))
            }
        })
    }

    /// Build the chunk tokenizer.
    pub fn build_tokenizer(&self) -> Result<Arc<dyn TokenCounter>> {
        Ok(self.tokenizer.build()?)
    }
}

/// Text splitting settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    /// Splitter model name.
    pub model: String,

    /// Fragment size, in splitter units.
    pub chunk_size: usize,

    /// Fragment overlap, in splitter units.
    pub chunk_overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            model: RECURSIVE_CHARACTER_SPLITTER.to_string(),
            chunk_size: 1000,
            chunk_overlap: 100,
        }
    }
}

/// Chunk indexing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Concurrent embedding calls per batch.
    pub batch_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}

/// Retrieval and answering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Fragments retrieved per question.
    pub top_k: usize,

    /// Minimum similarity for a fragment to be cited.
    pub min_relevance: f32,

    /// Default composite model id.
    pub model_id: String,

    /// Default system instruction.
    pub instruction: String,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Context tokens left free for the model's answer.
    pub completion_reserve: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_relevance: 0.3,
            model_id: "gpt-3.5-turbo-16k|openai".to_string(),
            instruction: DEFAULT_INSTRUCTION.to_string(),
            temperature: Some(0.0),
            completion_reserve: 512,
        }
    }
}

impl QueryConfig {
    /// Set the number of retrieved fragments.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the citation threshold.
    pub fn with_min_relevance(mut self, min_relevance: f32) -> Self {
        self.min_relevance = min_relevance;
        self
    }

    /// Set the default model.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Set the answer reserve.
    pub fn with_completion_reserve(mut self, completion_reserve: usize) -> Self {
        self.completion_reserve = completion_reserve;
        self
    }
}

/// Backend endpoints and credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Environment variable holding the OpenAI API key.
    pub openai_api_key_env: String,

    /// OpenAI-compatible base URL override.
    pub openai_base_url: Option<String>,

    /// Ollama server URL.
    pub ollama_url: String,

    /// LM Studio server URL.
    pub lmstudio_url: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai_api_key_env: "OPENAI_API_KEY".to_string(),
            openai_base_url: None,
            ollama_url: omni_llm::ollama::OLLAMA_BASE_URL.to_string(),
            lmstudio_url: omni_llm::openai::LMSTUDIO_BASE_URL.to_string(),
        }
    }
}

impl ProvidersConfig {
    /// The OpenAI API key, if the configured variable is set.
    pub fn openai_api_key(&self) -> Option<String> {
        std::env::var(&self.openai_api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }

    /// Gateway with every backend registered.
    pub fn build_gateway(&self, healer: &HealerConfig) -> Result<LlmGateway> {
        let mut openai = OpenAiCompatProvider::openai()
            .with_token_counter(TokenizerKind::Cl100k.build()?);
        if let Some(key) = self.openai_api_key() {
            openai = openai.with_api_key(key);
        }
        if let Some(url) = &self.openai_base_url {
            openai = openai.with_base_url(url.clone());
        }

        Ok(LlmGateway::new()
            .with_provider(Arc::new(openai))
            .with_provider(Arc::new(OllamaProvider::new().with_base_url(self.ollama_url.clone())))
            .with_provider(Arc::new(
                OpenAiCompatProvider::lmstudio().with_base_url(self.lmstudio_url.clone()),
            ))
            .with_healer(JsonSelfHealer::new(healer.clone())))
    }
}
