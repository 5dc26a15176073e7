//! # docbase-rag
//!
//! The retrieval core of docbase, a personal document knowledge base.
//!
//! Documents are split into overlapping chunks, the chunks are embedded into
//! fixed-dimension vectors, and the vectors are kept in a cosine-similarity
//! index. Questions are embedded the same way, matched against the index, and
//! answered by a language model from the best matching chunks, or by quoting
//! them when no model is available.
//!
//! ## Components
//!
//! - [`BoundaryChunker`]: overlapping windows that prefer natural breaks
//! - [`Embedder`]: lazily loaded embedding model with explicit lifecycle
//! - [`FlatIndex`] / [`InMemoryVectorStore`]: exact cosine search with a
//!   validated on-disk snapshot
//! - [`Retriever`]: query embedding, search, resolution and filtering
//! - [`AnswerComposer`]: bounded prompts, timeouts and extractive fallback
//! - [`RagPipeline`]: the facade tying them to a [`DocumentStore`]
//!
//! ## Features
//!
//! - `openai`: HTTP embedding and completion backends for OpenAI-compatible
//!   servers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docbase_rag::*;
//!
//! let store = Arc::new(InMemoryDocumentStore::new());
//! let pipeline = RagPipeline::builder()
//!     .embedding_provider("hashing", Arc::new(HashingEmbedder::default()))
//!     .vector_store(Arc::new(InMemoryVectorStore::new(384)))
//!     .document_store(store.clone())
//!     .build()?;
//!
//! store.put_document(Document::new("doc-1", "notes.txt", "text/plain", text.clone())).await?;
//! pipeline.ingest("doc-1", &text).await?;
//! pipeline.embed_all(false).await?;
//! let answer = pipeline.ask("What did I write about tides?", 5).await?;
//! println!("{} ({}%)", answer.text, answer.confidence);
//! ```

pub mod chunking;
pub mod composer;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod hashing;
pub mod index;
pub mod inference;
pub mod inmemory;
pub mod pipeline;
pub mod reranker;
pub mod retriever;
pub mod store;
pub mod text;
pub mod vectorstore;

#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{BoundaryChunker, Chunker, TextSpan, chunk, spans_to_chunks};
pub use composer::{AnswerComposer, NO_CONTEXT_ANSWER, confidence};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{Answer, AnswerMode, Chunk, Document, Embedding, RetrievalResult};
pub use embedding::{Embedder, EmbeddingModelLoader, EmbeddingProvider, StaticModelLoader};
pub use error::{RagError, Result};
pub use hashing::HashingEmbedder;
pub use index::{FlatIndex, ScoredChunk};
pub use inference::CompletionModel;
pub use inmemory::InMemoryVectorStore;
pub use pipeline::{EmbedReport, EmbeddingCoverage, RagPipeline, RagPipelineBuilder, SystemStatus};
pub use reranker::{NoOpReranker, Reranker};
pub use retriever::Retriever;
pub use store::{DocumentStore, InMemoryDocumentStore};
pub use text::clean_text;
pub use vectorstore::VectorStore;
