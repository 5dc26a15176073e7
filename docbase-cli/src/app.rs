//! Opening a knowledge base from an [`AppConfig`].

use std::sync::Arc;

use anyhow::{Context, Result};
use docbase_rag::{
    CompletionModel, Embedder, HashingEmbedder, InMemoryDocumentStore, InMemoryVectorStore,
    RagPipeline,
};
use tracing::{info, instrument, warn};

use crate::config::{AppConfig, EmbeddingBackend, LanguageModelConfig};

/// An open knowledge base: the configuration it was opened with and the
/// pipeline over its on-disk stores.
pub struct App {
    config: AppConfig,
    pipeline: RagPipeline,
}

impl App {
    /// Open (or create) the knowledge base under `config.data_dir`.
    ///
    /// The index is reconciled against the stored chunks on every open, so a
    /// crash between the two snapshot writes heals on the next run.
    #[instrument(skip_all, fields(data_dir = %config.data_dir.display()))]
    pub async fn open(config: AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await.with_context(|| {
            format!("failed to create data directory {}", config.data_dir.display())
        })?;

        let embedder = build_embedder(&config.embedding)?;
        let documents = InMemoryDocumentStore::open(config.documents_path())
            .await
            .context("failed to open document store")?;
        let index = InMemoryVectorStore::open(config.index_path(), embedder.dimension())
            .await
            .context("failed to open vector index")?;

        let mut builder = RagPipeline::builder()
            .config(config.rag.clone())
            .embedder(embedder)
            .document_store(Arc::new(documents))
            .vector_store(Arc::new(index));
        if let Some(llm) = &config.llm {
            builder = builder.completion_model(build_language_model(llm)?);
        }
        let pipeline = builder.build().context("failed to assemble pipeline")?;

        let (restored, pruned) = pipeline.reconcile().await.context("failed to reconcile index")?;
        if restored + pruned > 0 {
            warn!(restored, pruned, "index was out of sync with stored chunks");
        }
        info!("knowledge base open");
        Ok(Self { config, pipeline })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &RagPipeline {
        &self.pipeline
    }
}

fn build_embedder(backend: &EmbeddingBackend) -> Result<Arc<Embedder>> {
    match backend {
        EmbeddingBackend::Hashing { dimensions } => Ok(Arc::new(Embedder::from_provider(
            format!("hashing-{dimensions}"),
            Arc::new(HashingEmbedder::new(*dimensions)),
        ))),
        #[cfg(feature = "openai")]
        EmbeddingBackend::Openai { base_url, model, dimensions, api_key_env } => {
            use docbase_rag::openai::{OpenAiEmbeddingLoader, OpenAiEmbeddingProvider};

            let mut provider = OpenAiEmbeddingProvider::new(base_url, model, *dimensions);
            if let Some(key) = api_key(api_key_env.as_deref())? {
                provider = provider.with_api_key(key);
            }
            Ok(Arc::new(Embedder::new(Arc::new(OpenAiEmbeddingLoader::new(provider)))))
        }
        #[cfg(not(feature = "openai"))]
        EmbeddingBackend::Openai { .. } => {
            anyhow::bail!("the openai embedding backend needs a build with the `openai` feature")
        }
    }
}

#[cfg(feature = "openai")]
fn build_language_model(llm: &LanguageModelConfig) -> Result<Arc<dyn CompletionModel>> {
    use docbase_rag::openai::OpenAiCompletionModel;

    let mut model = OpenAiCompletionModel::new(&llm.base_url, &llm.model);
    if let Some(key) = api_key(llm.api_key_env.as_deref())? {
        model = model.with_api_key(key);
    }
    Ok(Arc::new(model))
}

#[cfg(not(feature = "openai"))]
fn build_language_model(_llm: &LanguageModelConfig) -> Result<Arc<dyn CompletionModel>> {
    anyhow::bail!("a language model needs a build with the `openai` feature")
}

/// Read an API key from the named environment variable.
#[cfg_attr(not(feature = "openai"), allow(dead_code))]
fn api_key(var: Option<&str>) -> Result<Option<String>> {
    var.map(|name| {
        std::env::var(name).with_context(|| format!("environment variable {name} is not set"))
    })
    .transpose()
}
