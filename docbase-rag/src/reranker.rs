//! Reranker trait for re-scoring retrieval results.

use async_trait::async_trait;

use crate::document::RetrievalResult;
use crate::error::Result;

/// A reranker that re-scores and reorders retrieval results.
///
/// The [`Retriever`](crate::Retriever) applies it after vector search and
/// before the similarity threshold, so rerankers that rescale scores also
/// change which results survive filtering.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rerank results given the original query.
    ///
    /// Returns results in a new order with potentially updated scores.
    async fn rerank(
        &self,
        query: &str,
        results: Vec<RetrievalResult>,
    ) -> Result<Vec<RetrievalResult>>;
}

/// A no-op reranker that returns results unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReranker;

#[async_trait]
impl Reranker for NoOpReranker {
    async fn rerank(
        &self,
        _query: &str,
        results: Vec<RetrievalResult>,
    ) -> Result<Vec<RetrievalResult>> {
        Ok(results)
    }
}
