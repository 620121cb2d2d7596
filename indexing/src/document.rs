//! Indexed documents and the chunks they own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use omni_common::RequestContext;
use omni_embeddings::{Embedding, VectorRecord};
use omni_storage::{ObjectStore, StorageError};

use crate::error::{IndexingError, Result};

/// Mime type of persisted document blobs.
pub const DOCUMENT_MIME_TYPE: &str = "application/json";

/// One embedded fragment of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Fragment text.
    pub text: String,

    /// Content id, scoped by the embedder.
    pub id: String,

    /// Token count under the embedder's tokenizer.
    pub token_count: usize,

    /// The embedding vector.
    pub embedding: Embedding,
}

/// A document split into embedded chunks, persisted as one blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    /// Content id of the source text and indexing parameters.
    pub id: String,

    /// Hashing scheme used for ids.
    pub hasher_model: String,

    /// Composite id of the embedder.
    pub embedder_model: String,

    /// Splitter model name.
    pub splitter_model: String,

    /// Fragment size, in splitter units.
    pub chunk_size: usize,

    /// Fragment overlap, in splitter units.
    pub chunk_overlap: usize,

    /// Chunks in document order.
    pub chunks: Vec<Chunk>,

    /// The texts the document was built from.
    pub source_texts: Vec<String>,

    /// Fragments dropped because no embedding could be computed.
    #[serde(default)]
    pub failed_fragments: usize,

    /// When the document was indexed.
    pub created_at: DateTime<Utc>,
}

impl IndexedDocument {
    /// Total tokens across all chunks.
    pub fn total_tokens(&self) -> usize {
        self.chunks.iter().map(|c| c.token_count).sum()
    }
}

/// Pointer from an index to a persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Object store ticket of the document blob.
    pub ticket: String,

    /// Id of the document.
    pub document_id: String,
}

impl DocumentRef {
    /// Create a reference.
    pub fn new(ticket: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            ticket: ticket.into(),
            document_id: document_id.into(),
        }
    }
}

/// A chunk together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedChunk {
    /// Id of the owning document.
    pub document_id: String,

    /// Position of the chunk within its document.
    pub position: usize,

    /// The chunk.
    pub chunk: Chunk,
}

impl SourcedChunk {
    /// Turn into a vector store record carrying the source in its metadata.
    pub fn to_record(&self) -> VectorRecord {
        VectorRecord::new(
            self.chunk.id.clone(),
            self.chunk.text.clone(),
            self.chunk.embedding.clone(),
        )
        .with_metadata(serde_json::json!({
            "document_id": self.document_id,
            "position": self.position,
            "token_count": self.chunk.token_count,
        }))
    }
}

/// Serialize and store a document. Returns the object store ticket.
pub async fn write_document(
    objects: &dyn ObjectStore,
    ctx: &RequestContext,
    document: &IndexedDocument,
) -> Result<String> {
    let bytes = serde_json::to_vec(document)?;
    let stored = ctx
        .guard(objects.put(bytes, DOCUMENT_MIME_TYPE))
        .await?
        .map_err(|e| IndexingError::CacheWrite(format!("document {}: {e}", document.id)))?;
    debug!("Stored document {} as {}", document.id, stored.ticket);
    Ok(stored.ticket)
}

/// Load and decode a stored document.
///
/// A missing blob is reported as [`IndexingError::DanglingReference`].
pub async fn read_document(
    objects: &dyn ObjectStore,
    ctx: &RequestContext,
    doc_ref: &DocumentRef,
) -> Result<IndexedDocument> {
    let bytes = match ctx.guard(objects.get(&doc_ref.ticket)).await? {
        Ok(bytes) => bytes,
        Err(StorageError::ObjectNotFound(_)) => {
            return Err(IndexingError::DanglingReference {
                ticket: doc_ref.ticket.clone(),
                document_id: doc_ref.document_id.clone(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    serde_json::from_slice(&bytes).map_err(|e| IndexingError::CorruptDocument {
        ticket: doc_ref.ticket.clone(),
        reason: e.to_string(),
    })
}
