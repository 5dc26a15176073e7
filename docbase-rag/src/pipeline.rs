//! Retrieval pipeline facade.
//!
//! The [`RagPipeline`] coordinates ingestion (chunk, then store), embedding
//! (embed, then commit to store and index), question answering (retrieve,
//! then compose) and maintenance (status, deletion, reconciliation).
//!
//! # Example
//!
//! ```rust,ignore
//! use docbase_rag::{HashingEmbedder, InMemoryDocumentStore, InMemoryVectorStore, RagPipeline};
//!
//! let pipeline = RagPipeline::builder()
//!     .embedding_provider("hashing", Arc::new(HashingEmbedder::default()))
//!     .vector_store(Arc::new(InMemoryVectorStore::new(384)))
//!     .document_store(store.clone())
//!     .build()?;
//!
//! pipeline.ingest("doc-1", &text).await?;
//! pipeline.embed_document("doc-1", false).await?;
//! let answer = pipeline.ask("What is in my notes?", 5).await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{Span, debug, error, info, instrument, warn};

use crate::chunking::{BoundaryChunker, Chunker, spans_to_chunks};
use crate::composer::AnswerComposer;
use crate::config::RagConfig;
use crate::document::{Answer, Chunk, Embedding, RetrievalResult};
use crate::embedding::{Embedder, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::inference::CompletionModel;
use crate::reranker::Reranker;
use crate::retriever::Retriever;
use crate::store::DocumentStore;
use crate::vectorstore::VectorStore;

/// Outcome of an embedding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedReport {
    /// Chunks whose embedding was generated and committed.
    pub embedded: usize,
    /// Chunks that failed individually and remain pending.
    pub failed: usize,
    /// Chunks left alone because they were already embedded.
    pub skipped: usize,
    /// Whether the run stopped early because cancellation was requested.
    pub cancelled: bool,
}

impl EmbedReport {
    fn absorb(&mut self, other: EmbedReport) {
        self.embedded += other.embedded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.cancelled |= other.cancelled;
    }
}

/// How many stored chunks carry an embedding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingCoverage {
    /// All stored chunks.
    pub total_chunks: usize,
    /// Chunks with an embedding.
    pub embedded_chunks: usize,
    /// Chunks still waiting for one.
    pub pending_chunks: usize,
    /// `embedded_chunks` as a percentage of `total_chunks`, one decimal.
    pub percent: f32,
}

impl EmbeddingCoverage {
    fn new(total_chunks: usize, embedded_chunks: usize) -> Self {
        let percent = if total_chunks == 0 {
            0.0
        } else {
            (embedded_chunks as f32 * 1000.0 / total_chunks as f32).round() / 10.0
        };
        Self {
            total_chunks,
            embedded_chunks,
            pending_chunks: total_chunks - embedded_chunks,
            percent,
        }
    }
}

/// A snapshot of the system's readiness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Vectors in the index.
    pub index_size: usize,
    /// Dimension of every vector in the index.
    pub dimension: usize,
    /// Whether the embedding model is resident.
    pub model_loaded: bool,
    /// Name of the embedding model.
    pub embedding_model: String,
    /// Stored chunks with and without embeddings.
    pub embedding_coverage: EmbeddingCoverage,
    /// Stored documents.
    pub document_count: usize,
    /// Name of the language model, if one is configured.
    pub language_model: Option<String>,
    /// Whether the language model reports itself reachable.
    pub language_model_available: bool,
    /// Whether questions can be answered from at least one embedded chunk.
    pub ready: bool,
}

/// The retrieval pipeline.
///
/// Mutating operations (`ingest`, embedding runs, `delete_document`,
/// `reconcile`) are serialised by an internal lock so their commits never
/// interleave. Questions and searches run concurrently with them and only
/// contend on the index's read-write lock.
pub struct RagPipeline {
    config: RagConfig,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<Embedder>,
    index: Arc<dyn VectorStore>,
    store: Arc<dyn DocumentStore>,
    retriever: Retriever,
    composer: AnswerComposer,
    write_lock: Mutex<()>,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// The pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The shared embedding service.
    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    /// The vector index.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.index
    }

    /// The persistence collaborator.
    pub fn document_store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Chunk `text` and store the chunks for an existing document.
    ///
    /// Any chunks from a previous ingestion are replaced and their vectors
    /// removed from the index. Text without content yields zero chunks,
    /// which leaves the document stored but not indexable.
    ///
    /// Returns the number of chunks created.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] if the document does not exist.
    #[instrument(skip_all, fields(document.id = %document_id, text_chars))]
    pub async fn ingest(&self, document_id: &str, text: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        if self.store.get_document(document_id).await?.is_none() {
            return Err(RagError::document_not_found(document_id));
        }
        Span::current().record("text_chars", text.chars().count());

        let previous: Vec<String> =
            self.store.list_chunks(document_id).await?.into_iter().map(|c| c.id).collect();
        if !previous.is_empty() {
            let ids: Vec<&str> = previous.iter().map(String::as_str).collect();
            let removed = self.index.remove(&ids).await?;
            debug!(replaced_chunks = previous.len(), removed_vectors = removed, "re-ingesting");
        }

        let chunks = spans_to_chunks(document_id, self.chunker.chunk(text));
        let chunk_count = chunks.len();
        self.store.save_chunks(document_id, chunks).await?;
        self.persist().await?;

        if chunk_count == 0 {
            warn!("document has no indexable text");
        } else {
            info!(chunk_count, "ingested document");
        }
        Ok(chunk_count)
    }

    /// Embed the chunks of one document.
    ///
    /// Without `force`, chunks that already carry an embedding are skipped.
    /// With `force`, every chunk is re-embedded and its index entry replaced.
    ///
    /// # Errors
    ///
    /// - [`RagError::NotFound`] if the document does not exist
    /// - [`RagError::ModelUnavailable`] if the embedding model cannot be loaded;
    ///   chunks committed before the failure stay committed
    /// - [`RagError::DimensionMismatch`] if the model returns malformed vectors
    #[instrument(skip_all, fields(document.id = %document_id, force = force))]
    pub async fn embed_document(&self, document_id: &str, force: bool) -> Result<EmbedReport> {
        let _guard = self.write_lock.lock().await;
        if self.store.get_document(document_id).await?.is_none() {
            return Err(RagError::document_not_found(document_id));
        }
        self.embed_chunks(document_id, force, None).await
    }

    /// Embed the chunks of every document.
    ///
    /// Per-chunk failures are counted in the report and do not stop the run.
    ///
    /// # Errors
    ///
    /// Same as [`embed_document`](RagPipeline::embed_document), minus `NotFound`.
    pub async fn embed_all(&self, force: bool) -> Result<EmbedReport> {
        self.embed_all_cancellable(force, &AtomicBool::new(false)).await
    }

    /// Embed the chunks of every document, stopping between chunk commits
    /// once `cancel` is set.
    ///
    /// A cancelled run leaves every committed chunk in place; running again
    /// without `force` resumes with the pending ones.
    #[instrument(skip(self, cancel))]
    pub async fn embed_all_cancellable(
        &self,
        force: bool,
        cancel: &AtomicBool,
    ) -> Result<EmbedReport> {
        let _guard = self.write_lock.lock().await;
        let started = Instant::now();
        let mut total = EmbedReport::default();
        for document in self.store.list_documents().await? {
            if cancel.load(Ordering::Relaxed) {
                total.cancelled = true;
                break;
            }
            let report = self.embed_chunks(&document.id, force, Some(cancel)).await?;
            total.absorb(report);
            if report.cancelled {
                break;
            }
        }
        info!(
            embedded = total.embedded,
            failed = total.failed,
            skipped = total.skipped,
            cancelled = total.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embedding run finished"
        );
        Ok(total)
    }

    async fn embed_chunks(
        &self,
        document_id: &str,
        force: bool,
        cancel: Option<&AtomicBool>,
    ) -> Result<EmbedReport> {
        let chunks = self.store.list_chunks(document_id).await?;
        let mut report = EmbedReport::default();
        let pending: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| {
                let keep = force || !c.is_embedded();
                if !keep {
                    report.skipped += 1;
                }
                keep
            })
            .collect();
        let is_cancelled = || cancel.is_some_and(|c| c.load(Ordering::Relaxed));

        let outcome = async {
            'batches: for batch in pending.chunks(self.config.embed_batch_size) {
                let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
                match self.embedder.embed(&texts).await {
                    Ok(vectors) => {
                        for (chunk, vector) in batch.iter().zip(vectors) {
                            if is_cancelled() {
                                report.cancelled = true;
                                break 'batches;
                            }
                            self.commit(chunk, vector).await?;
                            report.embedded += 1;
                        }
                    }
                    Err(e) if is_fatal(&e) => return Err(e),
                    Err(e) => {
                        warn!(
                            document.id = document_id,
                            batch_size = batch.len(),
                            error = %e,
                            "batch embedding failed, retrying chunk by chunk"
                        );
                        for chunk in batch {
                            if is_cancelled() {
                                report.cancelled = true;
                                break 'batches;
                            }
                            match self.embedder.embed_one(&chunk.text).await {
                                Ok(vector) => {
                                    self.commit(chunk, vector).await?;
                                    report.embedded += 1;
                                }
                                Err(e) if is_fatal(&e) => return Err(e),
                                Err(e) => {
                                    warn!(chunk.id = %chunk.id, error = %e, "chunk embedding failed");
                                    report.failed += 1;
                                }
                            }
                        }
                    }
                }
            }
            Ok::<(), RagError>(())
        }
        .await;

        // Whatever was committed before a failure is kept and persisted.
        let persisted = self.persist().await;
        if let Err(e) = outcome {
            error!(document.id = document_id, error = %e, "embedding aborted");
            if let Err(flush_error) = persisted {
                warn!(error = %flush_error, "failed to persist partial embedding run");
            }
            return Err(e);
        }
        persisted?;

        debug!(
            document.id = document_id,
            embedded = report.embedded,
            failed = report.failed,
            skipped = report.skipped,
            "embedded document"
        );
        Ok(report)
    }

    async fn commit(&self, chunk: &Chunk, vector: Embedding) -> Result<()> {
        self.store.save_chunk_embedding(&chunk.id, vector.clone()).await?;
        self.index.upsert(&chunk.id, &vector).await
    }

    /// Answer a question from the indexed documents.
    ///
    /// `top_k` is clamped to `1..=max_top_k`. An empty index gives a
    /// [`NoContext`](crate::AnswerMode::NoContext) answer with zero
    /// confidence. Language model failures and timeouts degrade the answer
    /// instead of failing the call.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidInput`] if the trimmed question is too short
    /// - query embedding errors such as [`RagError::ModelUnavailable`]
    #[instrument(skip_all, fields(top_k))]
    pub async fn ask(&self, question: &str, top_k: usize) -> Result<Answer> {
        let started = Instant::now();
        let question = self.validate_query(question)?;
        let top_k = self.config.clamp_top_k(top_k);
        Span::current().record("top_k", top_k);

        let supports = self.retriever.retrieve(question, top_k).await?;
        let answer = self.composer.compose(question, supports).await;
        info!(
            supports = answer.supports.len(),
            confidence = answer.confidence,
            mode = ?answer.mode,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "answered question"
        );
        Ok(answer)
    }

    /// Retrieve the chunks most similar to `query` without generating an answer.
    ///
    /// # Errors
    ///
    /// Same as [`ask`](RagPipeline::ask).
    #[instrument(skip(self, query))]
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        let query = self.validate_query(query)?;
        self.retriever.retrieve(query, self.config.clamp_top_k(top_k)).await
    }

    fn validate_query<'a>(&self, query: &'a str) -> Result<&'a str> {
        let trimmed = query.trim();
        if trimmed.chars().count() < self.config.min_question_chars {
            return Err(RagError::InvalidInput(format!(
                "question must be at least {} characters long",
                self.config.min_question_chars
            )));
        }
        Ok(trimmed)
    }

    /// Report index size, model state and embedding coverage.
    pub async fn status(&self) -> Result<SystemStatus> {
        let documents = self.store.list_documents().await?;
        let mut total_chunks = 0;
        let mut embedded_chunks = 0;
        for document in &documents {
            let chunks = self.store.list_chunks(&document.id).await?;
            total_chunks += chunks.len();
            embedded_chunks += chunks.iter().filter(|c| c.is_embedded()).count();
        }
        let index_size = self.index.len().await;
        let (language_model, language_model_available) = match self.composer.model() {
            Some(model) => (Some(model.name().to_string()), model.is_available().await),
            None => (None, false),
        };
        Ok(SystemStatus {
            index_size,
            dimension: self.index.dimension(),
            model_loaded: self.embedder.is_loaded().await,
            embedding_model: self.embedder.model_name().to_string(),
            embedding_coverage: EmbeddingCoverage::new(total_chunks, embedded_chunks),
            document_count: documents.len(),
            language_model,
            language_model_available,
            ready: embedded_chunks > 0 && index_size > 0,
        })
    }

    /// Delete a document, its chunks and their vectors.
    ///
    /// Returns the number of chunks removed.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] if the document does not exist.
    #[instrument(skip_all, fields(document.id = %document_id))]
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let chunk_ids = self.store.delete_document_cascade(document_id).await?;
        let ids: Vec<&str> = chunk_ids.iter().map(String::as_str).collect();
        let removed_vectors = self.index.remove(&ids).await?;
        self.persist().await?;
        info!(chunk_count = chunk_ids.len(), removed_vectors, "deleted document");
        Ok(chunk_ids.len())
    }

    /// Delete every document with its chunks, and empty the index.
    ///
    /// Returns `(documents, chunks)` removed. Index entries without a stored
    /// chunk are dropped too.
    #[instrument(skip_all)]
    pub async fn delete_all(&self) -> Result<(usize, usize)> {
        let _guard = self.write_lock.lock().await;
        let documents = self.store.list_documents().await?;
        let mut chunk_count = 0;
        for document in &documents {
            chunk_count += self.store.delete_document_cascade(&document.id).await?.len();
        }
        let remaining = self.index.chunk_ids().await;
        let ids: Vec<&str> = remaining.iter().map(String::as_str).collect();
        let removed_vectors = self.index.remove(&ids).await?;
        self.persist().await?;
        info!(document_count = documents.len(), chunk_count, removed_vectors, "deleted all documents");
        Ok((documents.len(), chunk_count))
    }

    /// Bring the index back in line with the stored chunks.
    ///
    /// Re-inserts vectors for embedded chunks missing from the index and
    /// prunes entries whose chunk is gone or no longer embedded. Returns
    /// `(restored, pruned)`.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<(usize, usize)> {
        let _guard = self.write_lock.lock().await;
        let mut embedded = HashSet::new();
        let mut restored = 0;
        let dimension = self.index.dimension();
        for document in self.store.list_documents().await? {
            for chunk in self.store.list_chunks(&document.id).await? {
                let Some(vector) = &chunk.embedding else {
                    continue;
                };
                if vector.len() != dimension {
                    warn!(
                        chunk.id = %chunk.id,
                        expected = dimension,
                        actual = vector.len(),
                        "stored embedding has the wrong dimension, leaving it out of the index"
                    );
                    continue;
                }
                if !self.index.contains(&chunk.id).await {
                    self.index.upsert(&chunk.id, vector).await?;
                    restored += 1;
                }
                embedded.insert(chunk.id);
            }
        }

        let stale: Vec<String> =
            self.index.chunk_ids().await.into_iter().filter(|id| !embedded.contains(id)).collect();
        let ids: Vec<&str> = stale.iter().map(String::as_str).collect();
        let pruned = self.index.remove(&ids).await?;

        if restored > 0 || pruned > 0 {
            self.index.flush().await?;
        }
        info!(restored, pruned, "reconciled index with document store");
        Ok((restored, pruned))
    }

    /// Persist the document store and the index.
    pub async fn flush(&self) -> Result<()> {
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        self.store.flush().await?;
        self.index.flush().await
    }
}

fn is_fatal(error: &RagError) -> bool {
    matches!(error, RagError::ModelUnavailable { .. } | RagError::DimensionMismatch { .. })
}

impl std::fmt::Debug for RagPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagPipeline")
            .field("config", &self.config)
            .field("embedder", &self.embedder)
            .field("retriever", &self.retriever)
            .field("composer", &self.composer)
            .finish_non_exhaustive()
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// The embedder, vector store and document store are required. The chunker
/// defaults to a [`BoundaryChunker`] built from the configuration; without a
/// completion model every answer is extractive.
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = RagPipeline::builder()
///     .config(RagConfig::default())
///     .embedder(Arc::new(embedder))
///     .vector_store(Arc::new(index))
///     .document_store(Arc::new(store))
///     .completion_model(Arc::new(llm))  // optional
///     .reranker(Arc::new(reranker))     // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedder: Option<Arc<Embedder>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    document_store: Option<Arc<dyn DocumentStore>>,
    chunker: Option<Arc<dyn Chunker>>,
    reranker: Option<Arc<dyn Reranker>>,
    completion_model: Option<Arc<dyn CompletionModel>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration. Defaults to [`RagConfig::default()`].
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the shared embedding service.
    pub fn embedder(mut self, embedder: Arc<Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Use an in-process embedding provider under `name`.
    pub fn embedding_provider(
        self,
        name: impl Into<String>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        self.embedder(Arc::new(Embedder::from_provider(name, provider)))
    }

    /// Set the vector index.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Set the persistence collaborator.
    pub fn document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.document_store = Some(store);
        self
    }

    /// Override the chunking strategy.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set an optional reranker applied after vector search.
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Set the language model used to generate answers.
    pub fn completion_model(mut self, model: Arc<dyn CompletionModel>) -> Self {
        self.completion_model = Some(model);
        self
    }

    /// Build the [`RagPipeline`].
    ///
    /// # Errors
    ///
    /// - [`RagError::Config`] if a required part is missing or the
    ///   configuration is inconsistent
    /// - [`RagError::DimensionMismatch`] if the index and the embedder
    ///   disagree on the vector dimension
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedder =
            self.embedder.ok_or_else(|| RagError::Config("embedder is required".to_string()))?;
        let index = self
            .vector_store
            .ok_or_else(|| RagError::Config("vector_store is required".to_string()))?;
        let store = self
            .document_store
            .ok_or_else(|| RagError::Config("document_store is required".to_string()))?;
        if index.dimension() != embedder.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: index.dimension(),
                actual: embedder.dimension(),
            });
        }
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(BoundaryChunker::from_config(&config)?),
        };

        let mut retriever =
            Retriever::new(Arc::clone(&embedder), Arc::clone(&index), Arc::clone(&store))
                .with_threshold(config.similarity_threshold);
        if let Some(reranker) = self.reranker {
            retriever = retriever.with_reranker(reranker);
        }
        let composer = AnswerComposer::new(&config, self.completion_model);

        Ok(RagPipeline {
            config,
            chunker,
            embedder,
            index,
            store,
            retriever,
            composer,
            write_lock: Mutex::new(()),
        })
    }
}
