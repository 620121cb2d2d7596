//! Document indexing: split, embed, persist.
//!
//! A document-level cache sits in front of the fragment-level embedding
//! cache: re-indexing identical text with identical parameters returns the
//! stored [`IndexedDocument`] without splitting or embedding anything.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use omni_common::{CommonError, ContentHasher, RequestContext, TokenCounter};
use omni_embeddings::EmbeddingCache;
use omni_storage::{KeyValueStore, KeyedLocks, ObjectStore};

use crate::document::{Chunk, DocumentRef, IndexedDocument, read_document, write_document};
use crate::error::{IndexingError, Result};
use crate::splitter::{RECURSIVE_CHARACTER_SPLITTER, TextSplitter, build_splitter};

/// Key namespace of the document-level cache.
const DOCUMENT_NAMESPACE: &str = "document";

/// Configuration for the chunk indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Splitter model name.
    pub splitter_model: String,

    /// Fragment size, in splitter units.
    pub chunk_size: usize,

    /// Fragment overlap, in splitter units.
    pub chunk_overlap: usize,

    /// Number of concurrent embedding calls per batch.
    pub batch_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            splitter_model: RECURSIVE_CHARACTER_SPLITTER.to_string(),
            chunk_size: 1000,
            chunk_overlap: 100,
            batch_size: 10,
        }
    }
}

impl IndexerConfig {
    /// Set the splitter model.
    pub fn with_splitter(mut self, model: impl Into<String>) -> Self {
        self.splitter_model = model.into();
        self
    }

    /// Set fragment size and overlap.
    pub fn with_chunking(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }

    /// Set the embedding batch width.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Result of indexing one document.
#[derive(Debug, Clone)]
pub struct IndexedOutcome {
    /// The indexed document.
    pub document: IndexedDocument,

    /// Object store ticket of the persisted document.
    pub ticket: String,

    /// Whether the document came from the document-level cache.
    pub cache_hit: bool,
}

impl IndexedOutcome {
    /// Reference to the persisted document.
    pub fn document_ref(&self) -> DocumentRef {
        DocumentRef::new(self.ticket.clone(), self.document.id.clone())
    }
}

/// Turns raw text into a persisted, embedded [`IndexedDocument`].
pub struct ChunkIndexer {
    config: IndexerConfig,
    splitter: Box<dyn TextSplitter>,
    tokenizer: Arc<dyn TokenCounter>,
    cache: Arc<EmbeddingCache>,
    kv: Arc<dyn KeyValueStore>,
    objects: Arc<dyn ObjectStore>,
    hasher: ContentHasher,
    locks: KeyedLocks,
}

impl ChunkIndexer {
    /// Create an indexer. Fails on an unknown splitter or invalid sizes.
    pub fn new(
        config: IndexerConfig,
        cache: Arc<EmbeddingCache>,
        kv: Arc<dyn KeyValueStore>,
        objects: Arc<dyn ObjectStore>,
        tokenizer: Arc<dyn TokenCounter>,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(IndexingError::Config("batch_size must be positive".to_string()));
        }
        let splitter = build_splitter(
            &config.splitter_model,
            config.chunk_size,
            config.chunk_overlap,
            Arc::clone(&tokenizer),
        )?;

        Ok(Self {
            config,
            splitter,
            tokenizer,
            cache,
            kv,
            objects,
            hasher: ContentHasher::new(),
            locks: KeyedLocks::new(),
        })
    }

    /// The indexer configuration.
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// The embedding cache fragments go through.
    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    /// Id a document with this text gets under the current parameters.
    pub fn document_id(&self, text: &str) -> Result<String> {
        Ok(self.hasher.document_id(
            &[text],
            &self.cache.scope(),
            &[
                ("splitter", self.config.splitter_model.clone()),
                ("chunk_size", self.config.chunk_size.to_string()),
                ("chunk_overlap", self.config.chunk_overlap.to_string()),
                ("tokenizer", self.tokenizer.fingerprint()),
            ],
        )?)
    }

    /// Index one document.
    ///
    /// Fragments whose embedding cannot be computed are left out and counted
    /// in `failed_fragments`. Cache write failures and cancellation abort.
    pub async fn index(
        &self,
        ctx: &RequestContext,
        text: &str,
        overwrite: bool,
    ) -> Result<IndexedOutcome> {
        if text.trim().is_empty() {
            return Err(CommonError::InvalidInput("document text is empty".to_string()).into());
        }
        ctx.check()?;

        let document_id = self.document_id(text)?;
        let key = ctx.scoped_key(&format!("{DOCUMENT_NAMESPACE}:{document_id}"));
        let _guard = self.locks.lock(&key).await;

        if !overwrite && let Some(outcome) = self.probe(ctx, &key, &document_id).await? {
            info!(
                "Document {document_id} served from cache ({} chunks)",
                outcome.document.chunks.len()
            );
            return Ok(outcome);
        }

        let fragments = self.splitter.split_text(text);
        debug!(
            "Split document {document_id} into {} fragments with {}",
            fragments.len(),
            self.splitter.model_name()
        );

        let (chunks, failed_fragments) = self.embed_fragments(ctx, &fragments, overwrite).await?;
        if failed_fragments > 0 {
            warn!("Document {document_id}: {failed_fragments} fragments could not be embedded");
        }

        let document = IndexedDocument {
            id: document_id,
            hasher_model: self.hasher.model().to_string(),
            embedder_model: self.cache.scope(),
            splitter_model: self.splitter.model_name().to_string(),
            chunk_size: self.config.chunk_size,
            chunk_overlap: self.config.chunk_overlap,
            chunks,
            source_texts: vec![text.to_string()],
            failed_fragments,
            created_at: Utc::now(),
        };

        let ticket = write_document(self.objects.as_ref(), ctx, &document).await?;
        let doc_ref = DocumentRef::new(ticket.clone(), document.id.clone());
        ctx.guard(self.kv.put(&key, serde_json::to_value(&doc_ref)?, None))
            .await?
            .map_err(|e| IndexingError::CacheWrite(format!("{key}: {e}")))?;

        info!(
            "Indexed document {} ({} chunks, {} tokens)",
            document.id,
            document.chunks.len(),
            document.total_tokens()
        );

        Ok(IndexedOutcome {
            document,
            ticket,
            cache_hit: false,
        })
    }

    /// Load a stored document by reference.
    pub async fn load(&self, ctx: &RequestContext, doc_ref: &DocumentRef) -> Result<IndexedDocument> {
        read_document(self.objects.as_ref(), ctx, doc_ref).await
    }

    /// Look the document up in the document-level cache. Anything unreadable
    /// is a miss; only interruptions propagate.
    async fn probe(
        &self,
        ctx: &RequestContext,
        key: &str,
        document_id: &str,
    ) -> Result<Option<IndexedOutcome>> {
        let stored = match ctx.guard(self.kv.get(key)).await? {
            Ok(Some(stored)) => stored,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!("Failed to read document cache {key}: {e}");
                return Ok(None);
            }
        };

        let doc_ref: DocumentRef = match serde_json::from_value(stored.value) {
            Ok(doc_ref) => doc_ref,
            Err(e) => {
                warn!("Failed to decode document cache {key}: {e}");
                return Ok(None);
            }
        };

        match read_document(self.objects.as_ref(), ctx, &doc_ref).await {
            Ok(document) if document.id == document_id => Ok(Some(IndexedOutcome {
                document,
                ticket: doc_ref.ticket,
                cache_hit: true,
            })),
            Ok(document) => {
                warn!(
                    "Document cache {key} points at {} instead of {document_id}",
                    document.id
                );
                Ok(None)
            }
            Err(IndexingError::Common(e)) => Err(e.into()),
            Err(e) => {
                warn!("Cached document for {key} is unreadable: {e}");
                Ok(None)
            }
        }
    }

    /// Embed fragments in bounded concurrent batches, preserving order.
    async fn embed_fragments(
        &self,
        ctx: &RequestContext,
        fragments: &[String],
        overwrite: bool,
    ) -> Result<(Vec<Chunk>, usize)> {
        let mut chunks = Vec::with_capacity(fragments.len());
        let mut failed = 0usize;

        for batch in fragments.chunks(self.config.batch_size) {
            let results = join_all(
                batch
                    .iter()
                    .map(|fragment| self.cache.embed_query(ctx, fragment, overwrite)),
            )
            .await;

            for (fragment, result) in batch.iter().zip(results) {
                match result {
                    Ok(Some(embedding)) => chunks.push(Chunk {
                        text: fragment.clone(),
                        id: self.cache.chunk_id(fragment)?,
                        token_count: self.tokenizer.count(fragment),
                        embedding,
                    }),
                    Ok(None) => failed += 1,
                    Err(e) if e.is_provider_failure() => {
                        warn!("Skipping fragment after embedding failure: {e}");
                        failed += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok((chunks, failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use omni_common::ApproxTokenCounter;
    use omni_embeddings::{
        EmbeddingError, EmbeddingProvider, EmbeddingRequest, EmbeddingResponse,
    };
    use omni_storage::{MemoryKvStore, MemoryObjectStore};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds text as `[len, vowels]`; fails on fragments containing "FAIL".
    #[derive(Default)]
    struct ShapeProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for ShapeProvider {
        fn name(&self) -> &str {
            "shape"
        }

        fn default_model(&self) -> &str {
            "v1"
        }

        fn default_dimension(&self) -> usize {
            2
        }

        async fn embed(
            &self,
            request: EmbeddingRequest,
        ) -> omni_embeddings::Result<EmbeddingResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.text.contains("FAIL") {
                return Err(EmbeddingError::ApiRequest("boom".to_string()));
            }
            let vowels = request.text.chars().filter(|c| "aeiou".contains(*c)).count();
            Ok(EmbeddingResponse {
                embedding: vec![request.text.len() as f32, vowels as f32],
                model: "v1".to_string(),
                dimension: 2,
                tokens_used: None,
            })
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    struct Fixture {
        provider: Arc<ShapeProvider>,
        kv: MemoryKvStore,
        objects: MemoryObjectStore,
        indexer: ChunkIndexer,
    }

    fn fixture(config: IndexerConfig) -> Fixture {
        let provider = Arc::new(ShapeProvider::default());
        let kv = MemoryKvStore::new();
        let objects = MemoryObjectStore::new();
        let cache = Arc::new(EmbeddingCache::new(
            Arc::clone(&provider) as Arc<dyn EmbeddingProvider>,
            Arc::new(kv.clone()),
        ));
        let indexer = ChunkIndexer::new(
            config,
            cache,
            Arc::new(kv.clone()),
            Arc::new(objects.clone()),
            Arc::new(ApproxTokenCounter::default()),
        )
        .unwrap();
        Fixture {
            provider,
            kv,
            objects,
            indexer,
        }
    }

    fn small_config() -> IndexerConfig {
        IndexerConfig::default().with_chunking(20, 0).with_batch_size(3)
    }

    const TEXT: &str = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";

    #[tokio::test]
    async fn test_index_splits_and_embeds_in_order() {
        let f = fixture(small_config());
        let ctx = RequestContext::new("alice");

        let outcome = f.indexer.index(&ctx, TEXT, false).await.unwrap();
        assert!(!outcome.cache_hit);

        let texts: Vec<&str> = outcome.document.chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts.join(" "), TEXT);
        for chunk in &outcome.document.chunks {
            assert_eq!(chunk.embedding[0], chunk.text.len() as f32);
            assert_eq!(chunk.token_count, chunk.text.chars().count().div_ceil(4));
        }
        assert_eq!(outcome.document.embedder_model, "v1|shape");
        assert_eq!(outcome.document.source_texts, vec![TEXT.to_string()]);
        assert_eq!(f.objects.len().await, 1);
    }

    #[tokio::test]
    async fn test_reindex_is_served_from_cache() {
        let f = fixture(small_config());
        let ctx = RequestContext::new("alice");

        let first = f.indexer.index(&ctx, TEXT, false).await.unwrap();
        let calls = f.provider.calls.load(Ordering::SeqCst);
        let second = f.indexer.index(&ctx, TEXT, false).await.unwrap();

        assert!(second.cache_hit);
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), calls);
        assert_eq!(second.document, first.document);
        assert_eq!(second.ticket, first.ticket);
        assert_eq!(f.objects.len().await, 1);
    }

    #[tokio::test]
    async fn test_overwrite_reembeds() {
        let f = fixture(small_config());
        let ctx = RequestContext::new("alice");

        let first = f.indexer.index(&ctx, TEXT, false).await.unwrap();
        let calls = f.provider.calls.load(Ordering::SeqCst);
        let second = f.indexer.index(&ctx, TEXT, true).await.unwrap();

        assert!(!second.cache_hit);
        assert_eq!(
            f.provider.calls.load(Ordering::SeqCst),
            calls + first.document.chunks.len()
        );
        assert_eq!(second.document.id, first.document.id);
    }

    #[tokio::test]
    async fn test_parameters_change_document_id() {
        let a = fixture(small_config());
        let b = fixture(small_config().with_chunking(30, 5));
        assert_ne!(
            a.indexer.document_id(TEXT).unwrap(),
            b.indexer.document_id(TEXT).unwrap()
        );
    }

    #[tokio::test]
    async fn test_tokenizer_change_misses_document_cache() {
        let f = fixture(small_config());
        let ctx = RequestContext::new("alice");
        let first = f.indexer.index(&ctx, TEXT, false).await.unwrap();

        let per_char = Arc::new(ApproxTokenCounter::new(1));
        let other = ChunkIndexer::new(
            small_config(),
            Arc::clone(f.indexer.cache()),
            Arc::new(f.kv.clone()),
            Arc::new(f.objects.clone()),
            Arc::clone(&per_char) as Arc<dyn TokenCounter>,
        )
        .unwrap();

        assert_ne!(
            other.document_id(TEXT).unwrap(),
            f.indexer.document_id(TEXT).unwrap()
        );
        let second = other.index(&ctx, TEXT, false).await.unwrap();
        assert!(!second.cache_hit);
        assert_ne!(second.document.id, first.document.id);
        for chunk in &second.document.chunks {
            assert_eq!(chunk.token_count, per_char.count(&chunk.text));
        }
    }

    #[tokio::test]
    async fn test_failed_fragments_are_counted() {
        let f = fixture(IndexerConfig::default().with_chunking(12, 0));
        let ctx = RequestContext::new("alice");

        let outcome = f
            .indexer
            .index(&ctx, "good words\n\nFAIL here\n\nmore good", false)
            .await
            .unwrap();

        assert_eq!(outcome.document.failed_fragments, 1);
        let texts: Vec<&str> = outcome.document.chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["good words", "more good"]);
    }

    #[tokio::test]
    async fn test_corrupt_document_cache_is_recomputed() {
        let f = fixture(small_config());
        let ctx = RequestContext::new("alice");
        let id = f.indexer.document_id(TEXT).unwrap();
        f.kv
            .put(
                &format!("alice:document:{id}"),
                serde_json::json!({"ticket": "missing", "document_id": id}),
                None,
            )
            .await
            .unwrap();

        let outcome = f.indexer.index(&ctx, TEXT, false).await.unwrap();
        assert!(!outcome.cache_hit);
        assert!(!outcome.document.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let f = fixture(small_config());
        let err = f
            .indexer
            .index(&RequestContext::new("alice"), "   ", false)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexingError::Common(CommonError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let f = fixture(small_config());
        let ctx = RequestContext::new("alice");
        ctx.cancellation_token().cancel();

        let err = f.indexer.index(&ctx, TEXT, false).await.unwrap_err();
        assert!(matches!(err, IndexingError::Common(CommonError::Cancelled)));
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_config() {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(ShapeProvider::default());
        let kv = Arc::new(MemoryKvStore::new());
        let cache = Arc::new(EmbeddingCache::new(provider, kv.clone()));
        let build = |config| {
            ChunkIndexer::new(
                config,
                Arc::clone(&cache),
                kv.clone(),
                Arc::new(MemoryObjectStore::new()),
                Arc::new(ApproxTokenCounter::default()),
            )
        };

        assert!(build(IndexerConfig::default().with_batch_size(0)).is_err());
        assert!(build(IndexerConfig::default().with_chunking(10, 20)).is_err());
        assert!(build(IndexerConfig::default().with_splitter("CodeSplitter_cobol")).is_err());
        assert!(build(IndexerConfig::default().with_splitter("CodeSplitter_go")).is_ok());
    }
}
