//! Query-time retrieval: embed, search, resolve, rerank, filter.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::document::RetrievalResult;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::reranker::Reranker;
use crate::store::DocumentStore;
use crate::vectorstore::VectorStore;

/// Finds the chunks most similar to a question.
///
/// Results are resolved back to chunk text and document filename through the
/// [`DocumentStore`]. Index entries whose chunk or document no longer exists
/// are skipped with a warning rather than failing the query.
pub struct Retriever {
    embedder: Arc<Embedder>,
    index: Arc<dyn VectorStore>,
    store: Arc<dyn DocumentStore>,
    reranker: Option<Arc<dyn Reranker>>,
    similarity_threshold: f32,
}

impl Retriever {
    /// Create a retriever without reranking or threshold filtering.
    pub fn new(
        embedder: Arc<Embedder>,
        index: Arc<dyn VectorStore>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self { embedder, index, store, reranker: None, similarity_threshold: -1.0 }
    }

    /// Rerank search results before threshold filtering.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Drop results scoring below `threshold`.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Retrieve up to `top_k` results for `question`, best first.
    ///
    /// An empty index yields an empty result without touching the embedding
    /// model.
    ///
    /// # Errors
    ///
    /// Returns embedding errors ([`RagError::ModelUnavailable`](crate::RagError::ModelUnavailable),
    /// [`RagError::DimensionMismatch`](crate::RagError::DimensionMismatch)) and
    /// persistence errors. Reranker failures are propagated too.
    pub async fn retrieve(&self, question: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        if top_k == 0 || self.index.is_empty().await {
            debug!(top_k, "nothing to search");
            return Ok(Vec::new());
        }

        let query = self.embedder.embed_one(question).await.map_err(|e| {
            error!(error = %e, "query embedding failed");
            e
        })?;
        let hits = self.index.search(&query, top_k).await?;

        let mut filenames: HashMap<String, Option<String>> = HashMap::new();
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(chunk) = self.store.get_chunk(&hit.chunk_id).await? else {
                warn!(chunk.id = %hit.chunk_id, "index entry has no stored chunk, skipping");
                continue;
            };
            let filename = match filenames.get(&chunk.document_id) {
                Some(cached) => cached.clone(),
                None => {
                    let name = self.store.get_document(&chunk.document_id).await?.map(|d| d.filename);
                    filenames.insert(chunk.document_id.clone(), name.clone());
                    name
                }
            };
            let Some(filename) = filename else {
                warn!(document.id = %chunk.document_id, "chunk belongs to a missing document, skipping");
                continue;
            };
            results.push(RetrievalResult {
                chunk_id: hit.chunk_id,
                document_id: chunk.document_id,
                score: hit.score,
                text: chunk.text,
                filename,
                chunk_index: chunk.index,
            });
        }

        let results = match &self.reranker {
            Some(reranker) => reranker.rerank(question, results).await.map_err(|e| {
                error!(error = %e, "reranking failed");
                e
            })?,
            None => results,
        };

        let threshold = self.similarity_threshold;
        let filtered: Vec<RetrievalResult> =
            results.into_iter().filter(|r| r.score >= threshold).collect();
        debug!(result_count = filtered.len(), top_k, "retrieval completed");
        Ok(filtered)
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("embedder", &self.embedder)
            .field("reranking", &self.reranker.is_some())
            .field("similarity_threshold", &self.similarity_threshold)
            .finish()
    }
}
