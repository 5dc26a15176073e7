//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`BoundaryChunker`], which
//! splits text into overlapping windows of a target character length and
//! prefers to cut at paragraph, sentence or word boundaries.
//!
//! All offsets are character (Unicode scalar value) offsets, end-exclusive,
//! so they stay valid for any UTF-8 input.

use serde::{Deserialize, Serialize};

use crate::config::{RagConfig, validate_chunking};
use crate::document::Chunk;
use crate::error::{RagError, Result};

/// A span of text cut from a larger text, with its character offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    /// The span's text.
    pub text: String,
    /// Character offset of the first character.
    pub start: usize,
    /// Character offset one past the last character.
    pub end: usize,
}

/// A strategy for splitting text into spans.
///
/// Implementations return an empty `Vec` for empty text.
pub trait Chunker: Send + Sync {
    /// Split `text` into spans ordered by start offset.
    fn chunk(&self, text: &str) -> Vec<TextSpan>;
}

/// Split `text` into overlapping spans of roughly `chunk_size` characters.
///
/// Uses [`BoundaryChunker`] with the default tolerance of `chunk_size / 4`.
///
/// # Errors
///
/// Returns [`RagError::Config`] if `chunk_size == 0` or
/// `chunk_overlap >= chunk_size`.
pub fn chunk(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<TextSpan>> {
    Ok(BoundaryChunker::new(chunk_size, chunk_overlap)?.chunk(text))
}

/// Turn spans into [`Chunk`] records owned by `document_id`.
///
/// Chunk IDs are generated as `{document_id}_{index}`; embeddings start absent.
pub fn spans_to_chunks(document_id: &str, spans: Vec<TextSpan>) -> Vec<Chunk> {
    spans
        .into_iter()
        .enumerate()
        .map(|(index, span)| Chunk {
            id: format!("{document_id}_{index}"),
            document_id: document_id.to_string(),
            index,
            text: span.text,
            start: span.start,
            end: span.end,
            embedding: None,
        })
        .collect()
}

/// Splits text into overlapping windows, cutting at natural breaks.
///
/// Each window targets `chunk_size` characters. Within the last `tolerance`
/// characters before the target end the chunker looks for, in order of
/// preference, a paragraph break (`\n\n`), a sentence end (`.`, `!` or `?`
/// followed by whitespace) and any whitespace. Without one it cuts at the
/// target. The next window starts `chunk_overlap` characters before the
/// previous end. When the rest of the text fits in `chunk_size + tolerance`
/// characters it becomes the final window, so no trailing window is made of
/// overlap alone.
///
/// # Example
///
/// ```rust,ignore
/// use docbase_rag::{BoundaryChunker, Chunker};
///
/// let chunker = BoundaryChunker::new(200, 50)?;
/// let spans = chunker.chunk(&text);
/// ```
#[derive(Debug, Clone)]
pub struct BoundaryChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    tolerance: usize,
}

impl BoundaryChunker {
    /// Create a new `BoundaryChunker` with a tolerance of `chunk_size / 4`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: target number of characters per chunk
    /// * `chunk_overlap`: number of overlapping characters between consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if `chunk_size == 0` or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_chunking(chunk_size, chunk_overlap)?;
        let tolerance = (chunk_size / 4).min(chunk_size - chunk_overlap - 1);
        Ok(Self { chunk_size, chunk_overlap, tolerance })
    }

    /// Build a chunker from the chunking fields of a [`RagConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if the chunking parameters are invalid.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)?
            .with_tolerance(config.effective_tolerance())
    }

    /// Override the natural-break tolerance.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if `tolerance >= chunk_size - chunk_overlap`,
    /// which could stop the window from advancing.
    pub fn with_tolerance(mut self, tolerance: usize) -> Result<Self> {
        let step = self.chunk_size - self.chunk_overlap;
        if tolerance >= step {
            return Err(RagError::Config(format!(
                "boundary tolerance ({tolerance}) must be less than chunk_size - chunk_overlap ({step})"
            )));
        }
        self.tolerance = tolerance;
        Ok(self)
    }

    /// The target chunk size in characters.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// The overlap between consecutive chunks in characters.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// The natural-break tolerance in characters.
    pub fn tolerance(&self) -> usize {
        self.tolerance
    }
}

impl Chunker for BoundaryChunker {
    fn chunk(&self, text: &str) -> Vec<TextSpan> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        if len == 0 {
            return Vec::new();
        }

        let mut spans = Vec::new();
        let mut start = 0;

        loop {
            let end = if len - start <= self.chunk_size.saturating_add(self.tolerance) {
                len
            } else {
                let target = start + self.chunk_size;
                let lowest = target.saturating_sub(self.tolerance).max(start + 1);
                find_break(&chars, lowest, target).unwrap_or(target)
            };

            spans.push(TextSpan { text: chars[start..end].iter().collect(), start, end });

            if end == len {
                break;
            }
            // `end > start + chunk_overlap` holds because tolerance < chunk_size - chunk_overlap.
            start = end.saturating_sub(self.chunk_overlap).max(start + 1);
        }

        spans
    }
}

/// Find the best cut position `p` in `lowest..=highest`, the chunk ending
/// just before `chars[p]`. Later positions win within the same break class.
fn find_break(chars: &[char], lowest: usize, highest: usize) -> Option<usize> {
    let candidates = || (lowest..=highest).rev();

    let paragraph = candidates().find(|&p| p >= 2 && chars[p - 1] == '\n' && chars[p - 2] == '\n');
    if paragraph.is_some() {
        return paragraph;
    }

    let sentence = candidates().find(|&p| {
        matches!(chars[p - 1], '.' | '!' | '?') && chars.get(p).is_none_or(|c| c.is_whitespace())
    });
    if sentence.is_some() {
        return sentence;
    }

    candidates().find(|&p| chars[p - 1].is_whitespace())
}
