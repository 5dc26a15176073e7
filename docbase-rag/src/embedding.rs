//! Embedding models and the [`Embedder`] service that owns their lifecycle.
//!
//! An [`EmbeddingProvider`] turns text into vectors. An [`EmbeddingModelLoader`]
//! knows how to bring a provider into memory. The [`Embedder`] ties the two
//! together: it loads the model lazily on first use, keeps it resident, and
//! exposes its load state so status checks can report it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::document::Embedding;
use crate::error::{RagError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Implementations must be deterministic: identical text always yields the
/// identical vector. The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
/// backends that support native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use docbase_rag::EmbeddingProvider;
///
/// let provider = HashingEmbedder::new(384);
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// The default implementation calls [`embed`](EmbeddingProvider::embed)
    /// sequentially for each input. Override this method if the backend
    /// supports native batch embedding for better throughput.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;
}

/// Loads an embedding model into memory.
///
/// Loading may be slow (reading weights, connecting to a server). Failures
/// should be reported as [`RagError::ModelUnavailable`].
#[async_trait]
pub trait EmbeddingModelLoader: Send + Sync {
    /// Human-readable model name, reported by status checks.
    fn model_name(&self) -> &str;

    /// The dimensionality the loaded model will produce.
    fn dimensions(&self) -> usize;

    /// Load the model.
    async fn load(&self) -> Result<Arc<dyn EmbeddingProvider>>;
}

/// A loader that hands out an already constructed provider.
pub struct StaticModelLoader {
    name: String,
    provider: Arc<dyn EmbeddingProvider>,
}

impl StaticModelLoader {
    /// Wrap `provider` under the given model name.
    pub fn new(name: impl Into<String>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { name: name.into(), provider }
    }
}

#[async_trait]
impl EmbeddingModelLoader for StaticModelLoader {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    async fn load(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        Ok(Arc::clone(&self.provider))
    }
}

/// The embedding service shared by ingestion and retrieval.
///
/// The model is loaded at most once and kept resident until [`unload`](Embedder::unload).
/// Every returned vector is checked against [`dimension`](Embedder::dimension).
pub struct Embedder {
    loader: Arc<dyn EmbeddingModelLoader>,
    model: RwLock<Option<Arc<dyn EmbeddingProvider>>>,
}

impl Embedder {
    /// Create an embedder that loads its model through `loader` on first use.
    pub fn new(loader: Arc<dyn EmbeddingModelLoader>) -> Self {
        Self { loader, model: RwLock::new(None) }
    }

    /// Create an embedder around an in-process provider.
    pub fn from_provider(name: impl Into<String>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::new(Arc::new(StaticModelLoader::new(name, provider)))
    }

    /// The configured model's name.
    pub fn model_name(&self) -> &str {
        self.loader.model_name()
    }

    /// The dimensionality of produced embeddings.
    pub fn dimension(&self) -> usize {
        self.loader.dimensions()
    }

    /// Whether the model is currently resident.
    pub async fn is_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }

    /// Load the model if it is not resident yet.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ModelUnavailable`] if the model cannot be loaded.
    pub async fn load(&self) -> Result<()> {
        self.provider().await.map(|_| ())
    }

    /// Drop the resident model. The next embedding call loads it again.
    pub async fn unload(&self) {
        if self.model.write().await.take().is_some() {
            info!(model = self.loader.model_name(), "embedding model unloaded");
        }
    }

    async fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        if let Some(model) = self.model.read().await.as_ref() {
            return Ok(Arc::clone(model));
        }

        let mut slot = self.model.write().await;
        // Another caller may have loaded it while we waited for the write lock.
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        let name = self.loader.model_name().to_string();
        info!(model = %name, "loading embedding model");
        let model = self.loader.load().await.map_err(|e| {
            error!(model = %name, error = %e, "failed to load embedding model");
            if matches!(e, RagError::ModelUnavailable { .. }) {
                e
            } else {
                RagError::ModelUnavailable { model: name.clone(), message: e.to_string() }
            }
        })?;

        if model.dimensions() != self.loader.dimensions() {
            return Err(RagError::ModelUnavailable {
                model: name,
                message: format!(
                    "loaded model reports {} dimensions, expected {}",
                    model.dimensions(),
                    self.loader.dimensions()
                ),
            });
        }

        info!(model = %name, dimensions = model.dimensions(), "embedding model loaded");
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Embed a batch of texts, loading the model if needed.
    ///
    /// # Errors
    ///
    /// - [`RagError::ModelUnavailable`] if the model cannot be loaded
    /// - [`RagError::DimensionMismatch`] if the model returns a vector of the wrong length
    /// - any provider error for transient failures
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.provider().await?;
        let embeddings = model.embed_batch(texts).await?;
        if embeddings.len() != texts.len() {
            return Err(RagError::Embedding {
                provider: self.loader.model_name().to_string(),
                message: format!(
                    "model returned {} embeddings for {} inputs",
                    embeddings.len(),
                    texts.len()
                ),
            });
        }
        for embedding in &embeddings {
            self.check_dimension(embedding)?;
        }
        debug!(count = texts.len(), "embedded batch");
        Ok(embeddings)
    }

    /// Embed a single text, typically a query.
    ///
    /// # Errors
    ///
    /// Same as [`embed`](Embedder::embed).
    pub async fn embed_one(&self, text: &str) -> Result<Embedding> {
        let model = self.provider().await?;
        let embedding = model.embed(text).await?;
        self.check_dimension(&embedding)?;
        Ok(embedding)
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        let expected = self.dimension();
        if embedding.len() != expected {
            return Err(RagError::DimensionMismatch { expected, actual: embedding.len() });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model", &self.loader.model_name())
            .field("dimension", &self.loader.dimensions())
            .finish()
    }
}
