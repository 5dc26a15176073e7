//! Error types for the `docbase-rag` crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in retrieval and answering operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid chunking, retrieval or composition parameters.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The embedding or inference model could not be loaded or reached.
    #[error("Model unavailable ({model}): {message}")]
    ModelUnavailable {
        /// The model that could not be used.
        model: String,
        /// A description of the failure.
        message: String,
    },

    /// An embedding's length does not match the index dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimension the index was created with.
        expected: usize,
        /// The dimension that was supplied.
        actual: usize,
    },

    /// A document or chunk identifier is unknown.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What kind of entity was looked up (`document`, `chunk`).
        kind: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// An operation exceeded its time budget.
    #[error("{operation} timed out after {}ms", budget.as_millis())]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The budget that was exceeded.
        budget: Duration,
    },

    /// A transient failure while embedding one or more inputs.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The language model answered with an error that is neither a timeout
    /// nor an availability problem.
    #[error("Inference error ({model}): {message}")]
    Inference {
        /// The language model that produced the error.
        model: String,
        /// A description of the failure.
        message: String,
    },

    /// A caller-supplied value was rejected.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A persisted index failed validation on load.
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// The persistence collaborator failed.
    #[error("Document store error: {message}")]
    Store {
        /// A description of the failure.
        message: String,
    },

    /// An I/O error while reading or writing persisted state.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A serialization error while encoding or decoding persisted state.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Build a [`RagError::NotFound`] for a document id.
    pub fn document_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { kind: "document", id: id.into() }
    }

    /// Build a [`RagError::NotFound`] for a chunk id.
    pub fn chunk_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { kind: "chunk", id: id.into() }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Embedding { .. })
    }
}

/// A convenience result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RagError>;
