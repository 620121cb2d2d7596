//! # Embeddings
//!
//! This crate provides embedding generation, caching and similarity search
//! for the Omni document pipeline.
//!
//! ## Features
//!
//! - **Embedding Generation**: Convert text to dense vectors via OpenAI or a
//!   local Ollama server
//! - **Caching**: Content-addressed, per-user embedding cache backed by the
//!   key-value store
//! - **Similarity Search**: Brute-force cosine search over indexed fragments
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► EmbeddingCache ──► KeyValueStore         │
//! │       │                                                         │
//! │       ▼                                                         │
//! │  query vector ──► VectorStore (fragments embedded at index time)│
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod provider;
pub mod similarity;
pub mod store;

pub use cache::{CacheEntry, CacheStats, EmbeddingCache};
pub use error::{EmbeddingError, Result};
pub use provider::{
    EmbedderBackend, EmbeddingProvider, EmbeddingRequest, EmbeddingResponse,
    OllamaEmbeddingProvider, OpenAIProvider, parse_embedder_id,
};
pub use similarity::cosine_similarity;
pub use store::{ScoredFragment, VectorRecord, VectorStore};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of embeddings (varies by model).
pub const DEFAULT_DIMENSION: usize = 1536; // OpenAI text-embedding-3-small
