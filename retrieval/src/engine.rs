//! The document QA pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use omni_common::{CommonError, RequestContext, TokenCounter};
use omni_embeddings::{CacheStats, EmbeddingCache, EmbeddingProvider, ScoredFragment, VectorStore};
use omni_indexing::{
    Chunk, ChunkIndexer, DocumentRef, IndexRegistry, IndexedOutcome, SourcedChunk,
    sanitize_index_name,
};
use omni_llm::{FunctionSpec, LlmGateway, ModelDescriptor, QueryRequest, TokenUsage};
use omni_storage::{FsKvStore, FsObjectStore, KeyValueStore, ObjectStore};

use crate::config::PipelineConfig;
use crate::error::{ErrorKind, Result, RetrievalError};
use crate::outcome::Outcome;
use crate::packer::{PackedBatch, pack};

/// MIME type of raw-text uploads.
pub const TEXT_MIME_TYPE: &str = "text/plain; charset=utf-8";

/// Separator between the answers of consecutive batches.
const ANSWER_SEPARATOR: &str = "\n\n";

/// A question against an index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Question text.
    pub text: String,

    /// Index to search; `None` means the global index.
    pub index_name: Option<String>,

    /// Documents searched in addition to the index.
    #[serde(default)]
    pub extra_documents: Vec<DocumentRef>,

    /// Composite model id overriding the configured one.
    pub model_id: Option<String>,

    /// Instruction overriding the configured one.
    pub instruction: Option<String>,

    /// Number of fragments to retrieve, overriding the configured one.
    pub top_k: Option<usize>,

    /// Functions for structured output.
    #[serde(default)]
    pub functions: Vec<FunctionSpec>,
}

impl Question {
    /// Ask `text` against the global index.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Search this index.
    pub fn with_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    /// Also search these documents.
    pub fn with_extra_documents(mut self, doc_refs: Vec<DocumentRef>) -> Self {
        self.extra_documents = doc_refs;
        self
    }

    /// Answer with this model.
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Answer under this instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Retrieve this many fragments.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Request structured output.
    pub fn with_functions(mut self, functions: Vec<FunctionSpec>) -> Self {
        self.functions = functions;
        self
    }
}

/// A fragment an answer is based on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Fragment id.
    pub chunk_id: String,

    /// Owning document.
    pub document_id: String,

    /// Similarity to the question.
    pub score: f32,
}

/// Answer to a [`Question`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Answer text; one paragraph per context batch.
    pub answer: String,

    /// Cited fragments, in source order.
    pub citations: Vec<Citation>,

    /// Structured output: the single batch's value, or an array with one
    /// value per batch.
    pub structured_args: Option<serde_json::Value>,

    /// Composite id of the model that answered.
    pub model: String,

    /// Token usage across all batches.
    pub usage: TokenUsage,
}

/// A document that was ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestedDocument {
    /// Document id.
    pub document_id: String,

    /// Object store ticket of the stored document.
    pub ticket: String,

    /// Number of chunks.
    pub chunks: usize,

    /// Total chunk tokens.
    pub tokens: usize,

    /// Fragments left out because they could not be embedded.
    pub failed_fragments: usize,

    /// Whether the document came from the document cache.
    pub cache_hit: bool,
}

impl From<&IndexedOutcome> for IngestedDocument {
    fn from(outcome: &IndexedOutcome) -> Self {
        Self {
            document_id: outcome.document.id.clone(),
            ticket: outcome.ticket.clone(),
            chunks: outcome.document.chunks.len(),
            tokens: outcome.document.total_tokens(),
            failed_fragments: outcome.document.failed_fragments,
            cache_hit: outcome.cache_hit,
        }
    }
}

impl IngestedDocument {
    /// Registry reference to this document.
    pub fn document_ref(&self) -> DocumentRef {
        DocumentRef::new(self.ticket.clone(), self.document_id.clone())
    }
}

/// Per-document results of an ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Sanitized index the documents were added to.
    pub index: String,

    /// One status per input document, in input order.
    pub documents: Vec<Outcome<IngestedDocument>>,
}

impl IngestReport {
    /// Number of documents that were ingested.
    pub fn succeeded(&self) -> usize {
        self.documents.iter().filter(|d| d.is_ok()).count()
    }
}

/// An index and the number of documents in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    /// Index name.
    pub name: String,

    /// Number of documents.
    pub documents: usize,
}

/// Ingests documents into indexes and answers questions against them.
pub struct Pipeline {
    config: PipelineConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    indexer: ChunkIndexer,
    registry: IndexRegistry,
    gateway: LlmGateway,
    objects: Arc<dyn ObjectStore>,
}

impl Pipeline {
    /// Assemble a pipeline from its collaborators.
    pub fn new(
        config: PipelineConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        tokenizer: Arc<dyn TokenCounter>,
        gateway: LlmGateway,
        kv: Arc<dyn KeyValueStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        let cache = Arc::new(EmbeddingCache::new(Arc::clone(&embedder), Arc::clone(&kv)));
        let indexer = ChunkIndexer::new(
            config.indexer_config(),
            cache,
            Arc::clone(&kv),
            Arc::clone(&objects),
            tokenizer,
        )?;
        let registry = IndexRegistry::new(kv, Arc::clone(&objects));

        Ok(Self {
            config,
            embedder,
            indexer,
            registry,
            gateway,
            objects,
        })
    }

    /// Build every backend from `config` over the given stores.
    pub fn from_config(
        config: PipelineConfig,
        kv: Arc<dyn KeyValueStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        let embedder = config.embedding.build_provider(&config.providers)?;
        let tokenizer = config.embedding.build_tokenizer()?;
        let gateway = config.providers.build_gateway(&config.healer)?;
        Self::new(config, embedder, tokenizer, gateway, kv, objects)
    }

    /// Open a pipeline over filesystem stores under the configured root.
    pub async fn open(config: PipelineConfig) -> Result<Self> {
        let root = config.storage.root.clone();
        info!("Opening pipeline at {}", root.display());
        let kv = FsKvStore::new(root.join("kv")).await?;
        let objects = FsObjectStore::new(root.join("objects")).await?;
        Self::from_config(config, Arc::new(kv), Arc::new(objects))
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The LLM gateway answers go through.
    pub fn gateway(&self) -> &LlmGateway {
        &self.gateway
    }

    /// Embedding cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.indexer.cache().stats()
    }

    /// Index each text and add the results to `index_name` and the global
    /// index. Failures are reported per document; only an empty input,
    /// cancellation or a registry write failure fail the whole call.
    pub async fn ingest(
        &self,
        ctx: &RequestContext,
        texts: &[String],
        index_name: Option<&str>,
        overwrite: bool,
    ) -> Result<IngestReport> {
        if texts.is_empty() {
            return Err(CommonError::InvalidInput("no documents to ingest".to_string()).into());
        }
        let sources = texts.iter().map(|text| Ok(text.clone())).collect();
        self.ingest_sources(ctx, sources, index_name, overwrite).await
    }

    /// Store raw text in the object store for a later [`Self::ingest_uploads`].
    /// Returns the ticket.
    pub async fn upload_text(&self, ctx: &RequestContext, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(CommonError::InvalidInput("upload text is empty".to_string()).into());
        }
        let stored = ctx
            .guard(self.objects.put(text.as_bytes().to_vec(), TEXT_MIME_TYPE))
            .await??;
        debug!("Uploaded {} bytes as {}", text.len(), stored.ticket);
        Ok(stored.ticket)
    }

    /// Ingest previously uploaded texts by ticket.
    pub async fn ingest_uploads(
        &self,
        ctx: &RequestContext,
        tickets: &[String],
        index_name: Option<&str>,
        overwrite: bool,
    ) -> Result<IngestReport> {
        if tickets.is_empty() {
            return Err(CommonError::InvalidInput("no uploads to ingest".to_string()).into());
        }

        let mut sources = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            sources.push(self.read_upload(ctx, ticket).await);
        }
        self.ingest_sources(ctx, sources, index_name, overwrite).await
    }

    async fn read_upload(&self, ctx: &RequestContext, ticket: &str) -> Result<String> {
        let bytes = ctx.guard(self.objects.get(ticket)).await??;
        String::from_utf8(bytes).map_err(|e| {
            CommonError::InvalidInput(format!("upload {ticket} is not UTF-8: {e}")).into()
        })
    }

    async fn ingest_sources(
        &self,
        ctx: &RequestContext,
        sources: Vec<Result<String>>,
        index_name: Option<&str>,
        overwrite: bool,
    ) -> Result<IngestReport> {
        let mut documents = Vec::with_capacity(sources.len());

        for (position, source) in sources.into_iter().enumerate() {
            let indexed = match source {
                Ok(text) => self
                    .indexer
                    .index(ctx, &text, overwrite)
                    .await
                    .map(|outcome| IngestedDocument::from(&outcome))
                    .map_err(RetrievalError::from),
                Err(e) => Err(e),
            };

            match indexed {
                Ok(document) => documents.push(Outcome::success(document)),
                Err(e) if e.kind() == ErrorKind::Cancelled => return Err(e),
                Err(e) => {
                    warn!("Document {position} failed to ingest: {e}");
                    documents.push(Outcome::failure(&e));
                }
            }
        }

        let doc_refs: Vec<DocumentRef> = documents
            .iter()
            .filter_map(|outcome| match outcome {
                Outcome::Ok { result, .. } => Some(result.document_ref()),
                Outcome::Err { .. } => None,
            })
            .collect();

        let index = if doc_refs.is_empty() {
            sanitize_index_name(index_name)
        } else {
            self.registry.register(ctx, &doc_refs, index_name).await?
        };

        let report = IngestReport { index, documents };
        info!(
            "Ingested {}/{} documents into index {}",
            report.succeeded(),
            report.documents.len(),
            report.index
        );
        Ok(report)
    }

    /// Answer a question from the fragments of an index.
    pub async fn query(&self, ctx: &RequestContext, question: &Question) -> Result<QueryResult> {
        if question.text.trim().is_empty() {
            return Err(CommonError::InvalidInput("question is empty".to_string()).into());
        }

        let model_id = question
            .model_id
            .as_deref()
            .unwrap_or(&self.config.query.model_id);
        let instruction = question
            .instruction
            .as_deref()
            .unwrap_or(&self.config.query.instruction);
        let top_k = question.top_k.unwrap_or(self.config.query.top_k);

        let indexes = self.registry.load(ctx).await?;
        let sourced = self
            .registry
            .resolve_chunks(
                ctx,
                &indexes,
                question.index_name.as_deref(),
                &question.extra_documents,
            )
            .await?;

        let hits = self.retrieve(ctx, &sourced, &question.text, top_k).await?;
        let context = in_source_order(&sourced, &hits);
        debug!(
            "Retrieved {} of {} fragments for question",
            context.len(),
            sourced.len()
        );

        let descriptor = self.gateway.descriptor(ctx, model_id).await?;
        let overhead = self
            .gateway
            .count_tokens(model_id, &format!("{instruction}{}", prompt("", &question.text)))?;
        let available = descriptor
            .context_size
            .saturating_sub(overhead + self.config.query.completion_reserve);
        if available == 0 {
            warn!(
                "Question leaves no context room in {model_id} ({overhead} tokens), \
                 sending fragments one per request"
            );
        }
        // Oversize fragments are packed alone, so a floor of one sends each separately.
        let budget = available.max(1);

        let batches = if context.is_empty() {
            vec![PackedBatch::default()]
        } else {
            let chunks: Vec<Chunk> = context.iter().map(|(c, _)| c.chunk.clone()).collect();
            pack(&chunks, budget)?
        };

        let mut answers = Vec::with_capacity(batches.len());
        let mut structured = Vec::new();
        let mut usage = TokenUsage::default();
        let mut model = String::new();

        for (i, batch) in batches.iter().enumerate() {
            debug!(
                "Asking batch {}/{} ({} tokens)",
                i + 1,
                batches.len(),
                batch.token_count
            );
            let mut request = QueryRequest::new(prompt(&batch.text, &question.text), model_id)
                .with_instruction(instruction)
                .with_functions(question.functions.clone());
            request.temperature = self.config.query.temperature;

            let response = self.gateway.query(ctx, &request).await?;
            answers.push(response.answer);
            structured.extend(response.structured_args);
            usage = usage.combined(response.usage);
            model = response.model;
        }

        let structured_args = match structured.len() {
            0 => None,
            1 => structured.pop(),
            _ => Some(serde_json::Value::Array(structured)),
        };

        let min_relevance = self.config.query.min_relevance;
        let citations = context
            .iter()
            .filter(|(_, score)| *score >= min_relevance)
            .map(|(sourced, score)| Citation {
                chunk_id: sourced.chunk.id.clone(),
                document_id: sourced.document_id.clone(),
                score: *score,
            })
            .collect::<Vec<_>>();

        info!(
            "Answered question with {model} from {} batches, {} citations",
            batches.len(),
            citations.len()
        );
        Ok(QueryResult {
            answer: answers.join(ANSWER_SEPARATOR),
            citations,
            structured_args,
            model,
            usage,
        })
    }

    async fn retrieve(
        &self,
        ctx: &RequestContext,
        sourced: &[SourcedChunk],
        question: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredFragment>> {
        if sourced.is_empty() {
            return Ok(Vec::new());
        }
        let store = VectorStore::build(sourced.iter().map(SourcedChunk::to_record).collect())?;
        Ok(ctx
            .guard(store.search(self.embedder.as_ref(), question, top_k))
            .await??)
    }

    /// Every model the gateway can answer with.
    pub async fn model_choices(&self, ctx: &RequestContext) -> Result<Vec<ModelDescriptor>> {
        Ok(self.gateway.model_choices(ctx).await?)
    }

    /// The user's indexes with their document counts.
    pub async fn indexes(&self, ctx: &RequestContext) -> Result<Vec<IndexSummary>> {
        let indexes = self.registry.load(ctx).await?;
        Ok(indexes
            .names()
            .map(|name| IndexSummary {
                name: name.to_string(),
                documents: indexes.get(name).map_or(0, <[DocumentRef]>::len),
            })
            .collect())
    }
}

fn prompt(context: &str, question: &str) -> String {
    if context.is_empty() {
        format!("Question: {question}")
    } else {
        format!("Context:\n{context}\n\nQuestion: {question}")
    }
}

/// Pair each hit with its source chunk, ordered by document and position.
fn in_source_order<'a>(
    sourced: &'a [SourcedChunk],
    hits: &[ScoredFragment],
) -> Vec<(&'a SourcedChunk, f32)> {
    let scores: HashMap<&str, f32> = hits.iter().map(|h| (h.id.as_str(), h.score)).collect();
    let mut emitted = HashSet::new();
    sourced
        .iter()
        .filter_map(|s| {
            let score = *scores.get(s.chunk.id.as_str())?;
            emitted.insert(s.chunk.id.as_str()).then_some((s, score))
        })
        .collect()
}
