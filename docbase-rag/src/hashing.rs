//! Built-in local embedding model based on feature hashing.
//!
//! [`HashingEmbedder`] needs no model files or network access. It hashes
//! lower-cased word unigrams and character trigrams into a fixed number of
//! signed buckets and L2-normalizes the result, so texts that share words
//! and word fragments land close together under cosine similarity.

use async_trait::async_trait;

use crate::document::Embedding;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// Default dimensionality, matching common sentence-embedding models.
pub const DEFAULT_DIMENSIONS: usize = 384;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

/// A deterministic feature-hashing embedding model.
///
/// # Example
///
/// ```rust,ignore
/// use docbase_rag::{EmbeddingProvider, HashingEmbedder};
///
/// let model = HashingEmbedder::new(384);
/// let v = model.embed("rust ownership").await?;
/// assert_eq!(v.len(), 384);
/// ```
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    /// Create a model producing vectors of `dimensions` components.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn vectorize(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();

        for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            self.accumulate(&mut vector, word.as_bytes(), WORD_WEIGHT);

            let padded: Vec<char> = std::iter::once('^')
                .chain(word.chars())
                .chain(std::iter::once('$'))
                .collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.accumulate(&mut vector, gram.as_bytes(), TRIGRAM_WEIGHT);
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

/// 64-bit FNV-1a, stable across platforms and releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        if self.dimensions == 0 {
            return Err(RagError::Embedding {
                provider: "hashing".into(),
                message: "dimensions must be greater than zero".into(),
            });
        }
        Ok(self.vectorize(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn vectors_are_normalized_and_sized() {
        let model = HashingEmbedder::new(128);
        let v = model.embed("Memory safety without garbage collection").await.unwrap();
        assert_eq!(v.len(), 128);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn related_text_scores_higher_than_unrelated() {
        let model = HashingEmbedder::default();
        let doc = model.embed("Rust guarantees memory safety through ownership").await.unwrap();
        let related = model.embed("how does rust ownership give memory safety").await.unwrap();
        let unrelated = model.embed("banana bread recipe with walnuts").await.unwrap();
        assert!(cosine(&doc, &related) > cosine(&doc, &unrelated));
    }

    #[tokio::test]
    async fn text_without_words_embeds_to_zero_vector() {
        let model = HashingEmbedder::new(16);
        let v = model.embed("  ... ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn fnv1a_matches_reference_values() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }
}
