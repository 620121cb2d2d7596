//! Per-user registry of named indexes.
//!
//! The registry is one revisioned key-value blob (`"<user>:omni_indexes_list"`)
//! mapping index names to ordered document references. Every document is
//! recorded in the reserved `global` index as well as the index it was
//! ingested into.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use omni_common::RequestContext;
use omni_storage::{KeyValueStore, ObjectStore, StorageError, update_with_retry};

use crate::document::{DocumentRef, IndexedDocument, SourcedChunk, read_document};
use crate::error::{IndexingError, Result};

/// Name of the index every document is added to.
pub const GLOBAL_INDEX: &str = "global";

/// Registry key, scoped per user.
const INDEXES_KEY: &str = "omni_indexes_list";

/// Attempts made when a concurrent writer bumps the registry revision.
pub const MAX_REGISTER_ATTEMPTS: usize = 5;

/// Normalize an index name: lowercase, keep `[a-z0-9_-]`, drop everything
/// else. An empty or missing name means the global index.
pub fn sanitize_index_name(name: Option<&str>) -> String {
    let sanitized: String = name
        .unwrap_or_default()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if sanitized.is_empty() {
        GLOBAL_INDEX.to_string()
    } else {
        sanitized
    }
}

/// Index name to ordered document references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indexes {
    #[serde(flatten)]
    entries: BTreeMap<String, Vec<DocumentRef>>,

    /// Revision the map was loaded at; 0 when never stored.
    #[serde(skip)]
    revision: u64,
}

impl Default for Indexes {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(GLOBAL_INDEX.to_string(), Vec::new());
        Self {
            entries,
            revision: 0,
        }
    }
}

impl Indexes {
    /// An empty registry containing only the global index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Revision this map was loaded at.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Index names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// References held by an index.
    pub fn get(&self, index_name: &str) -> Option<&[DocumentRef]> {
        self.entries.get(index_name).map(Vec::as_slice)
    }

    /// Add a document to the global index and to `index_name` (sanitized)
    /// if distinct. Each document is listed once per index: re-adding it
    /// keeps its position and points it at the newest ticket.
    /// Returns the sanitized index name.
    pub fn add_document(&mut self, doc_ref: &DocumentRef, index_name: Option<&str>) -> String {
        let name = sanitize_index_name(index_name);
        self.append(GLOBAL_INDEX, doc_ref);
        if name != GLOBAL_INDEX {
            self.append(&name, doc_ref);
        }
        name
    }

    fn append(&mut self, index_name: &str, doc_ref: &DocumentRef) {
        let refs = self.entries.entry(index_name.to_string()).or_default();
        match refs
            .iter_mut()
            .find(|existing| existing.document_id == doc_ref.document_id)
        {
            Some(existing) => existing.ticket.clone_from(&doc_ref.ticket),
            None => refs.push(doc_ref.clone()),
        }
    }

    fn from_value(value: serde_json::Value, revision: u64) -> serde_json::Result<Self> {
        let mut indexes: Indexes = serde_json::from_value(value)?;
        indexes.entries.entry(GLOBAL_INDEX.to_string()).or_default();
        indexes.revision = revision;
        Ok(indexes)
    }
}

/// Reads and updates the per-user index registry.
pub struct IndexRegistry {
    kv: Arc<dyn KeyValueStore>,
    objects: Arc<dyn ObjectStore>,
}

impl IndexRegistry {
    /// Create a registry over the given stores.
    pub fn new(kv: Arc<dyn KeyValueStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { kv, objects }
    }

    /// Load the user's indexes. A missing registry is an empty one.
    pub async fn load(&self, ctx: &RequestContext) -> Result<Indexes> {
        let key = ctx.scoped_key(INDEXES_KEY);
        match ctx.guard(self.kv.get(&key)).await?? {
            Some(stored) => Ok(Indexes::from_value(stored.value, stored.rev)?),
            None => Ok(Indexes::new()),
        }
    }

    /// Store `indexes`, failing with a conflict if the registry changed since
    /// they were loaded. Returns the new revision.
    pub async fn save(&self, ctx: &RequestContext, indexes: &Indexes) -> Result<u64> {
        let key = ctx.scoped_key(INDEXES_KEY);
        let value = serde_json::to_value(indexes)?;
        let rev = ctx
            .guard(self.kv.put(&key, value, Some(indexes.revision)))
            .await??;
        debug!("Saved index registry {key} at revision {rev}");
        Ok(rev)
    }

    /// Add documents to the global index and `index_name`, retrying the
    /// read-modify-write on concurrent updates. Returns the sanitized name.
    pub async fn register(
        &self,
        ctx: &RequestContext,
        doc_refs: &[DocumentRef],
        index_name: Option<&str>,
    ) -> Result<String> {
        let key = ctx.scoped_key(INDEXES_KEY);
        let name = sanitize_index_name(index_name);

        let update = update_with_retry(self.kv.as_ref(), &key, MAX_REGISTER_ATTEMPTS, |current| {
            let next = current
                .map_or_else(|| Ok(Indexes::new()), |value| Indexes::from_value(value, 0))
                .and_then(|mut indexes| {
                    for doc_ref in doc_refs {
                        indexes.add_document(doc_ref, Some(name.as_str()));
                    }
                    serde_json::to_value(&indexes)
                })
                .map_err(StorageError::from);
            std::future::ready(next)
        });
        let rev = ctx.guard(update).await??;

        info!(
            "Registered {} documents in index {name} (registry revision {rev})",
            doc_refs.len()
        );
        Ok(name)
    }

    /// Load every document referenced by `index_name` followed by
    /// `extra_doc_refs`, in order, each document once.
    pub async fn resolve_documents(
        &self,
        ctx: &RequestContext,
        indexes: &Indexes,
        index_name: Option<&str>,
        extra_doc_refs: &[DocumentRef],
    ) -> Result<Vec<IndexedDocument>> {
        let name = sanitize_index_name(index_name);
        let refs = indexes
            .get(&name)
            .ok_or_else(|| IndexingError::IndexNotFound(name.clone()))?;

        let mut seen = HashSet::new();
        let mut documents = Vec::new();
        for doc_ref in refs.iter().chain(extra_doc_refs) {
            if !seen.insert(doc_ref.document_id.as_str()) {
                continue;
            }
            documents.push(read_document(self.objects.as_ref(), ctx, doc_ref).await?);
        }

        debug!("Resolved {} documents from index {name}", documents.len());
        Ok(documents)
    }

    /// Chunks of every document resolved for `index_name`, concatenated in
    /// document order.
    pub async fn resolve_chunks(
        &self,
        ctx: &RequestContext,
        indexes: &Indexes,
        index_name: Option<&str>,
        extra_doc_refs: &[DocumentRef],
    ) -> Result<Vec<SourcedChunk>> {
        let documents = self
            .resolve_documents(ctx, indexes, index_name, extra_doc_refs)
            .await?;

        Ok(documents
            .into_iter()
            .flat_map(|document| {
                let document_id = document.id;
                document
                    .chunks
                    .into_iter()
                    .enumerate()
                    .map(move |(position, chunk)| SourcedChunk {
                        document_id: document_id.clone(),
                        position,
                        chunk,
                    })
            })
            .collect())
    }
}
