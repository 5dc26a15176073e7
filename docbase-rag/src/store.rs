//! Persistence collaborator for documents and chunks.
//!
//! The core never manages raw storage. It reads documents and chunks through
//! [`DocumentStore`] and writes back derived chunks and their embeddings.
//! [`InMemoryDocumentStore`] is a reference implementation that can snapshot
//! itself to a JSON file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::document::{Chunk, Document, Embedding};
use crate::error::{RagError, Result};
use crate::inmemory::write_atomically;

/// Storage of documents and their chunks.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace a document's metadata and text.
    async fn put_document(&self, document: Document) -> Result<()>;

    /// Fetch a document by id.
    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// All documents, oldest upload first.
    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// Replace all chunks of a document with `chunks`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] if the document does not exist.
    async fn save_chunks(&self, document_id: &str, chunks: Vec<Chunk>) -> Result<()>;

    /// The chunks of a document ordered by index.
    async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Fetch a chunk by id.
    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>>;

    /// Attach an embedding to a chunk, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] if the chunk does not exist.
    async fn save_chunk_embedding(&self, chunk_id: &str, embedding: Embedding) -> Result<()>;

    /// Delete a document and all of its chunks.
    ///
    /// Returns the ids of the deleted chunks.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] if the document does not exist.
    async fn delete_document_cascade(&self, id: &str) -> Result<Vec<String>>;

    /// Persist pending changes, if the store is durable.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    documents: BTreeMap<String, Document>,
    chunks: BTreeMap<String, Vec<Chunk>>,
    #[serde(skip)]
    chunk_owner: HashMap<String, String>,
}

impl StoreState {
    fn rebuild_owner_map(&mut self) {
        self.chunk_owner = self
            .chunks
            .iter()
            .flat_map(|(doc, chunks)| chunks.iter().map(move |c| (c.id.clone(), doc.clone())))
            .collect();
    }

    fn chunk_mut(&mut self, chunk_id: &str) -> Option<&mut Chunk> {
        let owner = self.chunk_owner.get(chunk_id)?;
        self.chunks.get_mut(owner)?.iter_mut().find(|c| c.id == chunk_id)
    }
}

/// A [`DocumentStore`] held in memory, optionally snapshotted to a JSON file.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
}

impl InMemoryDocumentStore {
    /// Create an empty, memory-only store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a file-backed store, loading the snapshot if the file exists.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] or [`RagError::Serialization`] if an existing
    /// snapshot cannot be read.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<StoreState>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        state.rebuild_owner_map();
        info!(
            path = %path.display(),
            documents = state.documents.len(),
            chunks = state.chunk_owner.len(),
            "opened document store"
        );
        Ok(Self { state: RwLock::new(state), path: Some(path) })
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn put_document(&self, document: Document) -> Result<()> {
        let mut state = self.state.write().await;
        state.documents.insert(document.id.clone(), document);
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.state.read().await.documents.get(id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let state = self.state.read().await;
        let mut documents: Vec<Document> = state.documents.values().cloned().collect();
        documents.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then_with(|| a.id.cmp(&b.id)));
        Ok(documents)
    }

    async fn save_chunks(&self, document_id: &str, mut chunks: Vec<Chunk>) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.documents.contains_key(document_id) {
            return Err(RagError::document_not_found(document_id));
        }
        let conflict = chunks.iter().find(|c| {
            state.chunk_owner.get(&c.id).is_some_and(|owner| owner.as_str() != document_id)
        });
        if let Some(conflict) = conflict {
            return Err(RagError::Store {
                message: format!("chunk id {} already belongs to another document", conflict.id),
            });
        }
        if let Some(old) = state.chunks.remove(document_id) {
            for chunk in old {
                state.chunk_owner.remove(&chunk.id);
            }
        }
        chunks.sort_by_key(|c| c.index);
        for chunk in &chunks {
            state.chunk_owner.insert(chunk.id.clone(), document_id.to_string());
        }
        debug!(document.id = document_id, chunk_count = chunks.len(), "saved chunks");
        state.chunks.insert(document_id.to_string(), chunks);
        Ok(())
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        Ok(self.state.read().await.chunks.get(document_id).cloned().unwrap_or_default())
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let state = self.state.read().await;
        let Some(owner) = state.chunk_owner.get(chunk_id) else {
            return Ok(None);
        };
        Ok(state.chunks.get(owner).and_then(|cs| cs.iter().find(|c| c.id == chunk_id)).cloned())
    }

    async fn save_chunk_embedding(&self, chunk_id: &str, embedding: Embedding) -> Result<()> {
        let mut state = self.state.write().await;
        let chunk = state.chunk_mut(chunk_id).ok_or_else(|| RagError::chunk_not_found(chunk_id))?;
        chunk.embedding = Some(embedding);
        Ok(())
    }

    async fn delete_document_cascade(&self, id: &str) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        if state.documents.remove(id).is_none() {
            return Err(RagError::document_not_found(id));
        }
        let removed: Vec<String> =
            state.chunks.remove(id).unwrap_or_default().into_iter().map(|c| c.id).collect();
        for chunk_id in &removed {
            state.chunk_owner.remove(chunk_id);
        }
        Ok(removed)
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(&*self.state.read().await)?;
        write_atomically(path, &bytes).await?;
        debug!(path = %path.display(), "persisted document store");
        Ok(())
    }
}
