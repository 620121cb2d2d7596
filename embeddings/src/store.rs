//! In-memory vector store built from already-embedded fragments.
//!
//! The store never computes fragment embeddings itself: records carry the
//! vectors produced at indexing time. Only the query is embedded, directly
//! through the provider and without touching the cache.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::provider::EmbeddingProvider;
use crate::similarity::rank_top_k;

/// A fragment with its precomputed embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Fragment id.
    pub id: String,

    /// Fragment text.
    pub text: String,

    /// The embedding vector.
    pub embedding: Embedding,

    /// Associated metadata (document id, position, ...).
    pub metadata: Option<serde_json::Value>,
}

impl VectorRecord {
    /// Create a record without metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            embedding,
            metadata: None,
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredFragment {
    /// Fragment id.
    pub id: String,

    /// Fragment text.
    pub text: String,

    /// Cosine similarity to the query.
    pub score: f32,

    /// Metadata carried over from the record.
    pub metadata: Option<serde_json::Value>,
}

/// Brute-force cosine similarity search over a fixed set of fragments.
#[derive(Debug, Default)]
pub struct VectorStore {
    records: Vec<VectorRecord>,
    dimension: Option<usize>,
}

impl VectorStore {
    /// Build a store from records. Records with empty embeddings are skipped
    /// and repeated ids keep their first occurrence. All remaining
    /// embeddings must share one dimension.
    pub fn build(records: Vec<VectorRecord>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(records.len());
        let mut dimension = None;
        let mut skipped = 0usize;

        for record in records {
            if record.embedding.is_empty() {
                skipped += 1;
                continue;
            }
            if !seen.insert(record.id.clone()) {
                debug!("Skipping repeated fragment {}", record.id);
                continue;
            }
            match dimension {
                None => dimension = Some(record.embedding.len()),
                Some(expected) if expected != record.embedding.len() => {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected,
                        actual: record.embedding.len(),
                    });
                }
                Some(_) => {}
            }
            kept.push(record);
        }

        info!(
            "Built vector store with {} fragments ({skipped} without embeddings)",
            kept.len()
        );

        Ok(Self {
            records: kept,
            dimension,
        })
    }

    /// Number of searchable fragments.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no fragments.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Embedding dimension, if any fragment is stored.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Embed `query` with `provider` and return the `k` most similar
    /// fragments, best first.
    pub async fn search(
        &self,
        provider: &dyn EmbeddingProvider,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredFragment>> {
        if self.records.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = provider.embed_query(query).await?;
        self.search_vector(&query_embedding, k, f32::NEG_INFINITY)
    }

    /// Return the `k` fragments most similar to a precomputed query vector
    /// with `score >= min_score`, best first.
    pub fn search_vector(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredFragment>> {
        if let Some(expected) = self.dimension
            && expected != query.len()
        {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }

        let ranked = rank_top_k(
            query,
            self.records.iter().map(|r| r.embedding.as_slice()),
            k,
            min_score,
        )?;

        Ok(ranked
            .into_iter()
            .map(|(position, score)| {
                let record = &self.records[position];
                ScoredFragment {
                    id: record.id.clone(),
                    text: record.text.clone(),
                    score,
                    metadata: record.metadata.clone(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{EmbeddingRequest, EmbeddingResponse};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct FixedProvider(Embedding);

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn default_model(&self) -> &str {
            "fixed"
        }

        fn default_dimension(&self) -> usize {
            self.0.len()
        }

        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            Ok(EmbeddingResponse {
                embedding: self.0.clone(),
                model: "fixed".to_string(),
                dimension: self.0.len(),
                tokens_used: None,
            })
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn records() -> Vec<VectorRecord> {
        vec![
            VectorRecord::new("a", "alpha", vec![1.0, 0.0, 0.0]),
            VectorRecord::new("b", "beta", vec![0.0, 1.0, 0.0]),
            VectorRecord::new("c", "gamma", vec![0.7, 0.7, 0.0]),
        ]
    }

    #[test]
    fn test_build_skips_empty_and_repeated() {
        let mut input = records();
        input.push(VectorRecord::new("d", "no vector", Vec::new()));
        input.push(VectorRecord::new("a", "alpha again", vec![0.0, 0.0, 1.0]));

        let store = VectorStore::build(input).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.dimension(), Some(3));
    }

    #[test]
    fn test_build_rejects_mixed_dimensions() {
        let mut input = records();
        input.push(VectorRecord::new("e", "short", vec![1.0]));
        assert!(matches!(
            VectorStore::build(input),
            Err(EmbeddingError::DimensionMismatch { expected: 3, actual: 1 })
        ));
    }

    #[test]
    fn test_search_vector_orders_by_score() {
        let store = VectorStore::build(records()).unwrap();
        let hits = store.search_vector(&[1.0, 0.0, 0.0], 2, 0.0).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(hits[0].text, "alpha");
    }

    #[test]
    fn test_search_vector_dimension_mismatch() {
        let store = VectorStore::build(records()).unwrap();
        assert!(store.search_vector(&[1.0, 0.0], 2, 0.0).is_err());
    }

    #[tokio::test]
    async fn test_search_embeds_query_with_provider() {
        let store = VectorStore::build(records()).unwrap();
        let provider = FixedProvider(vec![0.0, 1.0, 0.0]);
        let hits = store.search(&provider, "anything", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn test_search_empty_store() {
        let store = VectorStore::build(Vec::new()).unwrap();
        let provider = FixedProvider(vec![1.0]);
        assert!(store.search(&provider, "q", 3).await.unwrap().is_empty());
    }
}
