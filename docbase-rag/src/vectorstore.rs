//! Vector store trait for storing and searching chunk embeddings.

use async_trait::async_trait;

use crate::error::Result;
use crate::index::ScoredChunk;

/// A shared store of chunk embeddings with similarity search.
///
/// Every stored embedding has the same dimension. Implementations must make
/// mutations mutually exclusive with searches and snapshots so readers never
/// observe a partially updated index.
///
/// # Example
///
/// ```rust,ignore
/// use docbase_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new(384);
/// store.upsert("doc_0", &embedding).await?;
/// let hits = store.search(&query_embedding, 5).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Add or replace the vector for a chunk. A replaced vector no longer
    /// influences search results.
    async fn upsert(&self, chunk_id: &str, embedding: &[f32]) -> Result<()>;

    /// Remove the vectors for the given chunks. Unknown ids are ignored.
    ///
    /// Returns how many vectors were removed.
    async fn remove(&self, chunk_ids: &[&str]) -> Result<usize>;

    /// Search for the `top_k` chunks most similar to `embedding`.
    ///
    /// Returns results ordered by descending similarity, ties broken by
    /// earliest insertion.
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;

    /// Whether a vector is stored for the chunk.
    async fn contains(&self, chunk_id: &str) -> bool;

    /// All stored chunk ids in insertion order.
    async fn chunk_ids(&self) -> Vec<String>;

    /// Number of stored vectors.
    async fn len(&self) -> usize;

    /// Whether the store holds no vectors.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The dimension every stored vector has.
    fn dimension(&self) -> usize;

    /// Write the current contents to durable storage, if the store has any.
    async fn flush(&self) -> Result<()>;
}
