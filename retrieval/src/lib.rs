//! # Retrieval pipeline
//!
//! Ties the lower crates into a document QA pipeline:
//!
//! - **Ingest**: index texts through the embedding cache and record them in
//!   named indexes
//! - **Query**: search an index, pack the best fragments under the model's
//!   context size and answer with citations
//! - **Outcome**: every boundary result serializes as `{ok, result}` or
//!   `{ok: false, error}`
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                           Pipeline                             │
//! ├────────────────────────────────────────────────────────────────┤
//! │  ingest:  text ─► ChunkIndexer ─► ObjectStore ─► IndexRegistry │
//! │                                                                │
//! │  query:   IndexRegistry ─► VectorStore ─► TokenBudgetPacker    │
//! │                                   │                            │
//! │                                   ▼                            │
//! │                      LlmGateway (+ JsonSelfHealer)             │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use omni_common::RequestContext;
//! use omni_retrieval::{Pipeline, PipelineConfig, Question};
//!
//! let pipeline = Pipeline::open(PipelineConfig::load("omni.toml")?).await?;
//! let ctx = RequestContext::new("alice");
//!
//! pipeline.ingest(&ctx, &[chapter_one, chapter_two], Some("book1"), false).await?;
//! let result = pipeline
//!     .query(&ctx, &Question::new("Who finds the key?").with_index("book1"))
//!     .await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod outcome;
pub mod packer;

pub use config::{
    EmbeddingConfig, IndexingConfig, PipelineConfig, ProvidersConfig, QueryConfig,
    SplitterConfig, StorageConfig,
};
pub use engine::{
    Citation, IndexSummary, IngestReport, IngestedDocument, Pipeline, QueryResult, Question,
};
pub use error::{ErrorKind, Result, RetrievalError};
pub use outcome::{ErrorReport, Outcome};
pub use packer::{PackedBatch, combine_without_overlap, pack};
