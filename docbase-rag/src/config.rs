//! Configuration for the retrieval pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Configuration parameters for chunking, retrieval and answer composition.
///
/// Every field has a default, so a partial JSON document deserializes into a
/// complete configuration. Use [`RagConfig::builder()`] or
/// [`RagConfig::validate()`] to check parameter consistency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// How far before the target end the chunker looks for a natural break.
    /// `None` means a quarter of `chunk_size`.
    pub boundary_tolerance: Option<usize>,
    /// Default number of results to retrieve.
    pub top_k: usize,
    /// Upper bound applied to any requested `top_k`.
    pub max_top_k: usize,
    /// Minimum similarity score for results (results below this are filtered out).
    pub similarity_threshold: f32,
    /// Number of chunk texts sent to the embedding model per call.
    pub embed_batch_size: usize,
    /// Character budget for retrieved context inside the prompt.
    pub max_context_chars: usize,
    /// Token limit passed to the language model.
    pub max_answer_tokens: usize,
    /// Overall budget for one language model call.
    #[serde(with = "duration_millis", rename = "inference_timeout_ms")]
    pub inference_timeout: Duration,
    /// Questions shorter than this (after trimming) are rejected.
    pub min_question_chars: usize,
    /// Number of supports quoted in an extractive answer.
    pub extractive_chunks: usize,
    /// Maximum characters quoted from each support in an extractive answer.
    pub extractive_snippet_chars: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
            boundary_tolerance: None,
            top_k: 5,
            max_top_k: 10,
            similarity_threshold: 0.0,
            embed_batch_size: 32,
            max_context_chars: 3000,
            max_answer_tokens: 256,
            inference_timeout: Duration::from_secs(30),
            min_question_chars: 3,
            extractive_chunks: 3,
            extractive_snippet_chars: 300,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// The effective boundary tolerance in characters.
    pub fn effective_tolerance(&self) -> usize {
        self.boundary_tolerance.unwrap_or(self.chunk_size / 4)
    }

    /// Clamp a requested `top_k` into `1..=max_top_k`.
    pub fn clamp_top_k(&self, requested: usize) -> usize {
        requested.clamp(1, self.max_top_k.max(1))
    }

    /// Check that all parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        validate_chunking(self.chunk_size, self.chunk_overlap)?;
        let tolerance = self.effective_tolerance();
        if tolerance >= self.chunk_size - self.chunk_overlap {
            return Err(RagError::Config(format!(
                "boundary_tolerance ({tolerance}) must be less than chunk_size - chunk_overlap ({})",
                self.chunk_size - self.chunk_overlap
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".to_string()));
        }
        if self.max_top_k < self.top_k {
            return Err(RagError::Config(format!(
                "max_top_k ({}) must be at least top_k ({})",
                self.max_top_k, self.top_k
            )));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RagError::Config(format!(
                "similarity_threshold ({}) must be within [-1, 1]",
                self.similarity_threshold
            )));
        }
        if self.embed_batch_size == 0 {
            return Err(RagError::Config("embed_batch_size must be greater than zero".to_string()));
        }
        if self.max_context_chars == 0 {
            return Err(RagError::Config(
                "max_context_chars must be greater than zero".to_string(),
            ));
        }
        if self.inference_timeout.is_zero() {
            return Err(RagError::Config("inference_timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Validate a `(chunk_size, chunk_overlap)` pair.
pub(crate) fn validate_chunking(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(RagError::Config(format!(
            "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the target chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the window in which natural breaks are preferred.
    pub fn boundary_tolerance(mut self, tolerance: usize) -> Self {
        self.config.boundary_tolerance = Some(tolerance);
        self
    }

    /// Set the default number of results to retrieve.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the cap applied to requested `top_k` values.
    pub fn max_top_k(mut self, k: usize) -> Self {
        self.config.max_top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the number of texts per embedding call.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Set the character budget for prompt context.
    pub fn max_context_chars(mut self, chars: usize) -> Self {
        self.config.max_context_chars = chars;
        self
    }

    /// Set the token limit for generated answers.
    pub fn max_answer_tokens(mut self, tokens: usize) -> Self {
        self.config.max_answer_tokens = tokens;
        self
    }

    /// Set the overall budget for a language model call.
    pub fn inference_timeout(mut self, timeout: Duration) -> Self {
        self.config.inference_timeout = timeout;
        self
    }

    /// Set the minimum question length.
    pub fn min_question_chars(mut self, chars: usize) -> Self {
        self.config.min_question_chars = chars;
        self
    }

    /// Set how many supports an extractive answer quotes, and how much of each.
    pub fn extractive(mut self, chunks: usize, snippet_chars: usize) -> Self {
        self.config.extractive_chunks = chunks;
        self.config.extractive_snippet_chars = snippet_chars;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - the boundary tolerance leaves no room for progress
    /// - `top_k == 0` or `max_top_k < top_k`
    /// - any budget is zero or the threshold is outside `[-1, 1]`
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
