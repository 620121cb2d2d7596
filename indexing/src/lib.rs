//! # Indexing
//!
//! Turns raw documents into persisted, embedded chunk sets and keeps track
//! of which documents belong to which named index.
//!
//! ## Components
//!
//! - **TextSplitter**: character, token and language-aware splitters
//! - **ChunkIndexer**: split + embed + persist, behind a document-level cache
//! - **IndexRegistry**: per-user map of index names to document references
//!
//! ## Flow
//!
//! ```text
//! text ──► document id ──► document cache ──hit──► IndexedDocument
//!                               │
//!                              miss
//!                               ▼
//!          TextSplitter ──► EmbeddingCache (batches) ──► ObjectStore
//!                                                            │
//!                                     IndexRegistry ◄── DocumentRef
//! ```

pub mod document;
pub mod error;
pub mod indexer;
pub mod registry;
pub mod splitter;

pub use document::{Chunk, DocumentRef, IndexedDocument, SourcedChunk};
pub use error::{IndexingError, Result};
pub use indexer::{ChunkIndexer, IndexedOutcome, IndexerConfig};
pub use registry::{GLOBAL_INDEX, IndexRegistry, Indexes, sanitize_index_name};
pub use splitter::{Language, RecursiveSplitter, SplitterKind, TextSplitter, build_splitter};
