//! In-memory vector store with optional file persistence.
//!
//! This module provides [`InMemoryVectorStore`], a [`FlatIndex`] protected by
//! a `tokio::sync::RwLock`: searches and snapshots take the read lock,
//! upserts and removals take the write lock.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::index::{FlatIndex, ScoredChunk};
use crate::vectorstore::VectorStore;

/// An in-memory vector store using cosine similarity for search.
///
/// When opened with [`open`](InMemoryVectorStore::open) the store is backed
/// by a file; [`flush`](VectorStore::flush) rewrites it atomically.
///
/// # Example
///
/// ```rust,ignore
/// use docbase_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::open("data/index.json", 384).await?;
/// store.upsert("doc_0", &embedding).await?;
/// store.flush().await?;
/// ```
#[derive(Debug)]
pub struct InMemoryVectorStore {
    index: RwLock<FlatIndex>,
    dimension: usize,
    path: Option<PathBuf>,
}

impl InMemoryVectorStore {
    /// Create a new empty, memory-only store.
    pub fn new(dimension: usize) -> Self {
        Self { index: RwLock::new(FlatIndex::new(dimension)), dimension, path: None }
    }

    /// Open a file-backed store, loading existing contents if the file exists.
    ///
    /// # Errors
    ///
    /// - [`RagError::DimensionMismatch`](crate::RagError::DimensionMismatch) if the
    ///   persisted index was built for another dimension
    /// - [`RagError::CorruptIndex`](crate::RagError::CorruptIndex) if the file fails validation
    /// - [`RagError::Io`](crate::RagError::Io) if the file cannot be read
    pub async fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let index = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let index = FlatIndex::from_bytes(&bytes, dimension).map_err(|e| {
                    error!(path = %path.display(), error = %e, "failed to load vector index");
                    e
                })?;
                info!(path = %path.display(), entries = index.len(), dimension, "loaded vector index");
                index
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), dimension, "creating new vector index");
                FlatIndex::new(dimension)
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { index: RwLock::new(index), dimension, path: Some(path) })
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Remove every vector.
    pub async fn clear(&self) {
        self.index.write().await.clear();
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, chunk_id: &str, embedding: &[f32]) -> Result<()> {
        let replaced = self.index.write().await.insert(chunk_id, embedding)?;
        if replaced {
            debug!(chunk.id = chunk_id, "replaced vector");
        }
        Ok(())
    }

    async fn remove(&self, chunk_ids: &[&str]) -> Result<usize> {
        let mut index = self.index.write().await;
        Ok(chunk_ids.iter().filter(|id| index.remove(id)).count())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        self.index.read().await.search(embedding, top_k)
    }

    async fn contains(&self, chunk_id: &str) -> bool {
        self.index.read().await.contains(chunk_id)
    }

    async fn chunk_ids(&self) -> Vec<String> {
        self.index.read().await.chunk_ids()
    }

    async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        // Serialize under the read lock so the snapshot is never torn by a writer.
        let (bytes, entries) = {
            let index = self.index.read().await;
            (index.to_bytes()?, index.len())
        };
        write_atomically(path, &bytes).await.map_err(|e| {
            error!(path = %path.display(), error = %e, "failed to persist vector index");
            e
        })?;
        debug!(path = %path.display(), entries, "persisted vector index");
        Ok(())
    }
}

/// Write `bytes` to a sibling temp file and rename it over `path`.
pub(crate) async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
