//! Content-addressed embedding cache.
//!
//! Wraps an [`EmbeddingProvider`] with the user key-value store so identical
//! fragment text is embedded once per embedder. Entries live under
//! `"<user>:embedding:<chunk_id>"` where the chunk id is scoped by the
//! embedder's composite id.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use omni_common::{ContentHasher, RequestContext};
use omni_storage::{KeyValueStore, KeyedLocks};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::provider::EmbeddingProvider;
use crate::similarity::is_valid_embedding;

/// Key namespace for cached fragment embeddings.
const EMBEDDING_NAMESPACE: &str = "embedding";

/// Cache entry for an embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Content id of the embedded text.
    pub id: String,

    /// The text that was embedded.
    pub text: String,

    /// The embedding vector.
    pub embedding: Embedding,

    /// Composite id of the embedder that produced the vector.
    pub model: String,

    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

/// Counters describing how the cache has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered from storage.
    pub hits: u64,

    /// Lookups that went to the provider.
    pub misses: u64,

    /// Provider calls that produced no usable vector.
    pub failures: u64,
}

/// Caching front for an embedding provider.
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    kv: Arc<dyn KeyValueStore>,
    hasher: ContentHasher,
    locks: KeyedLocks,
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
}

impl EmbeddingCache {
    /// Create a cache over `provider` persisting into `kv`.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            provider,
            kv,
            hasher: ContentHasher::new(),
            locks: KeyedLocks::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Composite id of the wrapped embedder.
    pub fn scope(&self) -> String {
        self.provider.scope()
    }

    /// Content id under which `text` is cached.
    pub fn chunk_id(&self, text: &str) -> Result<String> {
        Ok(self.hasher.chunk_id(text, &self.scope())?)
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Embed one text, answering from the cache when possible.
    ///
    /// Returns `Ok(None)` when the provider produced an empty or non-finite
    /// vector. With `overwrite` the stored entry is discarded and recomputed.
    pub async fn embed_query(
        &self,
        ctx: &RequestContext,
        text: &str,
        overwrite: bool,
    ) -> Result<Option<Embedding>> {
        let scope = self.scope();
        let chunk_id = self.hasher.chunk_id(text, &scope)?;
        let key = ctx.scoped_key(&format!("{EMBEDDING_NAMESPACE}:{chunk_id}"));

        let _guard = self.locks.lock(&key).await;

        if overwrite {
            ctx.guard(self.kv.delete(&key, None))
                .await?
                .map_err(|e| EmbeddingError::CacheWrite(format!("{key}: {e}")))?;
        } else if let Some(embedding) = self.lookup(ctx, &key).await? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Embedding cache hit for {chunk_id}");
            return Ok(Some(embedding));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Embedding cache miss for {chunk_id}, calling {scope}");

        let embedding = match ctx.guard(self.provider.embed_query(text)).await? {
            Ok(embedding) => embedding,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        if !is_valid_embedding(&embedding) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!("Provider {scope} returned an unusable embedding for {chunk_id}");
            return Ok(None);
        }

        let entry = CacheEntry {
            id: chunk_id,
            text: text.to_string(),
            embedding,
            model: scope,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&entry)?;
        ctx.guard(self.kv.put(&key, value, None))
            .await?
            .map_err(|e| EmbeddingError::CacheWrite(format!("{key}: {e}")))?;

        Ok(Some(entry.embedding))
    }

    /// Embed several texts in order, one at a time.
    pub async fn embed_documents(
        &self,
        ctx: &RequestContext,
        texts: &[String],
        overwrite: bool,
    ) -> Result<Vec<Option<Embedding>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed_query(ctx, text, overwrite).await?);
        }
        Ok(results)
    }

    /// Read a cached vector. Unreadable entries count as misses.
    async fn lookup(&self, ctx: &RequestContext, key: &str) -> Result<Option<Embedding>> {
        let stored = match ctx.guard(self.kv.get(key)).await? {
            Ok(Some(stored)) => stored,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!("Failed to read cached embedding {key}: {e}");
                return Ok(None);
            }
        };

        match serde_json::from_value::<CacheEntry>(stored.value) {
            Ok(entry) if is_valid_embedding(&entry.embedding) => Ok(Some(entry.embedding)),
            Ok(_) => {
                warn!("Cached embedding {key} is unusable, recomputing");
                Ok(None)
            }
            Err(e) => {
                warn!("Failed to decode cached embedding {key}: {e}");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{EmbeddingRequest, EmbeddingResponse};
    use async_trait::async_trait;
    use omni_common::CommonError;
    use omni_storage::{MemoryKvStore, StorageError, Versioned};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    /// Embeds text as `[len, 1.0]` and counts calls.
    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn default_model(&self) -> &str {
            "len"
        }

        fn default_dimension(&self) -> usize {
            2
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let embedding = if request.text == "broken" {
                vec![f32::NAN, 1.0]
            } else {
                vec![request.text.len() as f32, 1.0]
            };
            Ok(EmbeddingResponse {
                embedding,
                model: "len".to_string(),
                dimension: 2,
                tokens_used: None,
            })
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    /// Key-value store whose writes always fail.
    struct ReadOnlyKv;

    #[async_trait]
    impl KeyValueStore for ReadOnlyKv {
        async fn get(&self, _key: &str) -> omni_storage::Result<Option<Versioned>> {
            Ok(None)
        }

        async fn put(
            &self,
            key: &str,
            _value: serde_json::Value,
            _rev: Option<u64>,
        ) -> omni_storage::Result<u64> {
            Err(StorageError::Write(key.to_string()))
        }

        async fn delete(&self, _key: &str, _rev: Option<u64>) -> omni_storage::Result<bool> {
            Ok(false)
        }
    }

    fn cache_with(provider: Arc<CountingProvider>, kv: MemoryKvStore) -> EmbeddingCache {
        EmbeddingCache::new(provider, Arc::new(kv))
    }

    #[tokio::test]
    async fn test_second_lookup_is_a_hit() {
        let provider = Arc::new(CountingProvider::default());
        let kv = MemoryKvStore::new();
        let cache = cache_with(Arc::clone(&provider), kv.clone());
        let ctx = RequestContext::new("alice");

        let first = cache.embed_query(&ctx, "hello", false).await.unwrap();
        let second = cache.embed_query(&ctx, "hello", false).await.unwrap();

        assert_eq!(first, Some(vec![5.0, 1.0]));
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                failures: 0
            }
        );

        let chunk_id = cache.chunk_id("hello").unwrap();
        let keys = kv.keys_with_prefix("alice:embedding:").await;
        assert_eq!(keys, vec![format!("alice:embedding:{chunk_id}")]);
    }

    #[tokio::test]
    async fn test_entries_are_scoped_by_user() {
        let provider = Arc::new(CountingProvider::default());
        let cache = cache_with(Arc::clone(&provider), MemoryKvStore::new());

        cache
            .embed_query(&RequestContext::new("alice"), "hello", false)
            .await
            .unwrap();
        cache
            .embed_query(&RequestContext::new("bob"), "hello", false)
            .await
            .unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_overwrite_recomputes() {
        let provider = Arc::new(CountingProvider::default());
        let cache = cache_with(Arc::clone(&provider), MemoryKvStore::new());
        let ctx = RequestContext::new("alice");

        cache.embed_query(&ctx, "hello", false).await.unwrap();
        cache.embed_query(&ctx, "hello", true).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unusable_vector_is_not_cached() {
        let provider = Arc::new(CountingProvider::default());
        let kv = MemoryKvStore::new();
        let cache = cache_with(Arc::clone(&provider), kv.clone());
        let ctx = RequestContext::new("alice");

        assert_eq!(cache.embed_query(&ctx, "broken", false).await.unwrap(), None);
        assert!(kv.is_empty().await);
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let provider = Arc::new(CountingProvider::default());
        let kv = MemoryKvStore::new();
        let cache = cache_with(Arc::clone(&provider), kv.clone());
        let ctx = RequestContext::new("alice");

        let chunk_id = cache.chunk_id("hello").unwrap();
        kv.put(
            &format!("alice:embedding:{chunk_id}"),
            serde_json::json!({"garbage": true}),
            None,
        )
        .await
        .unwrap();

        let embedding = cache.embed_query(&ctx, "hello", false).await.unwrap();
        assert_eq!(embedding, Some(vec![5.0, 1.0]));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_failure_is_fatal() {
        let provider = Arc::new(CountingProvider::default());
        let cache = EmbeddingCache::new(provider, Arc::new(ReadOnlyKv));
        let ctx = RequestContext::new("alice");

        let err = cache.embed_query(&ctx, "hello", false).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::CacheWrite(_)));
    }

    #[tokio::test]
    async fn test_empty_text_is_invalid() {
        let cache = cache_with(Arc::new(CountingProvider::default()), MemoryKvStore::new());
        let err = cache
            .embed_query(&RequestContext::new("alice"), "", false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::Common(CommonError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let provider = Arc::new(CountingProvider::default());
        let cache = cache_with(Arc::clone(&provider), MemoryKvStore::new());
        let ctx = RequestContext::new("alice");
        ctx.cancellation_token().cancel();

        let err = cache.embed_query(&ctx, "hello", false).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Common(CommonError::Cancelled)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embed_documents_preserves_order() {
        let cache = cache_with(Arc::new(CountingProvider::default()), MemoryKvStore::new());
        let texts = vec!["a".to_string(), "abc".to_string(), "ab".to_string()];
        let embeddings = cache
            .embed_documents(&RequestContext::new("u"), &texts, false)
            .await
            .unwrap();
        assert_eq!(
            embeddings,
            vec![
                Some(vec![1.0, 1.0]),
                Some(vec![3.0, 1.0]),
                Some(vec![2.0, 1.0])
            ]
        );
    }
}
