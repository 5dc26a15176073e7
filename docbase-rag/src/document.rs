//! Data types for documents, chunks, retrieval results and answers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fixed-length embedding vector.
pub type Embedding = Vec<f32>;

/// An uploaded source document.
///
/// Owned by the persistence layer; the core only reads its text and writes
/// back the chunks derived from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: String,
    /// The name the document was uploaded under.
    pub filename: String,
    /// MIME type of the original upload (`text/plain`, `application/pdf`).
    pub content_type: String,
    /// The extracted text content of the document.
    pub text: String,
    /// When the document was uploaded.
    pub uploaded_at: DateTime<Utc>,
    /// Number of characters in `text`.
    pub total_chars: usize,
}

impl Document {
    /// Create a document stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            total_chars: text.chars().count(),
            text,
            uploaded_at: Utc::now(),
        }
    }
}

/// A contiguous span of a [`Document`], the unit of embedding and retrieval.
///
/// Text and offsets are immutable once created. The embedding is attached
/// later; `embedding.is_some()` is the exact "embedded" state of the chunk,
/// independent of index membership.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk (`{document_id}_{index}`).
    pub id: String,
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// Ordinal position within the parent document.
    pub index: usize,
    /// The text content of the chunk.
    pub text: String,
    /// Character offset where the chunk starts in the parent text.
    pub start: usize,
    /// Character offset one past the chunk's last character.
    pub end: usize,
    /// The vector embedding, once generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
}

impl Chunk {
    /// Whether an embedding has been generated and saved for this chunk.
    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }
}

/// A retrieved chunk resolved back to its source text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    /// The retrieved chunk's identifier.
    pub chunk_id: String,
    /// The parent document's identifier.
    pub document_id: String,
    /// Cosine similarity between the query and the chunk, in `[-1, 1]`.
    pub score: f32,
    /// The chunk text.
    pub text: String,
    /// The parent document's filename.
    pub filename: String,
    /// Ordinal position of the chunk within its document.
    pub chunk_index: usize,
}

/// How an [`Answer`]'s text was produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerMode {
    /// The language model produced the text from the retrieved context.
    Generated,
    /// No language model answer was available; the text quotes the supports.
    Extractive {
        /// Why generation was skipped.
        reason: String,
    },
    /// Nothing relevant was retrieved.
    NoContext,
    /// The language model exceeded its budget; the text quotes the supports.
    TimedOut {
        /// The budget that was exceeded.
        #[serde(with = "budget_millis", rename = "budget_ms")]
        budget: Duration,
    },
}

/// The result of answering a question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    /// The answer text.
    pub text: String,
    /// The retrieved chunks the answer is based on, best first.
    pub supports: Vec<RetrievalResult>,
    /// Confidence percentage in `[0, 100]` derived from support similarity.
    pub confidence: f32,
    /// How the text was produced.
    pub mode: AnswerMode,
}

impl Answer {
    /// Whether the answer was produced without the language model's help
    /// even though supporting chunks were found.
    pub fn is_degraded(&self) -> bool {
        matches!(self.mode, AnswerMode::Extractive { .. } | AnswerMode::TimedOut { .. })
    }

    /// Whether the language model exceeded its budget.
    pub fn timed_out(&self) -> bool {
        matches!(self.mode, AnswerMode::TimedOut { .. })
    }
}

mod budget_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
