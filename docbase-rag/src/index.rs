//! Exact nearest-neighbour index over cosine similarity.
//!
//! [`FlatIndex`] keeps every vector L2-normalized, so similarity is the dot
//! product and scores lie in `[-1, 1]`. Each entry carries an insertion
//! sequence number; search orders by score descending and breaks ties by
//! earliest insertion. Replacing a chunk's vector counts as a new insertion.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::document::Embedding;
use crate::error::{RagError, Result};

const FORMAT: &str = "docbase-index";
const FORMAT_VERSION: u32 = 1;
const METRIC: &str = "cosine";

#[derive(Debug, Clone)]
struct Entry {
    chunk_id: String,
    vector: Embedding,
    seq: u64,
}

/// A scored search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    /// The matched chunk's identifier.
    pub chunk_id: String,
    /// Cosine similarity with the query.
    pub score: f32,
}

/// An in-memory exact cosine-similarity index keyed by chunk id.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    entries: Vec<Entry>,
    slots: HashMap<String, usize>,
    next_seq: u64,
}

impl FlatIndex {
    /// Create an empty index for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self { dimension, entries: Vec::new(), slots: HashMap::new(), next_seq: 0 }
    }

    /// The vector dimension this index accepts.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a vector is stored for `chunk_id`.
    pub fn contains(&self, chunk_id: &str) -> bool {
        self.slots.contains_key(chunk_id)
    }

    /// Stored chunk ids in insertion order.
    pub fn chunk_ids(&self) -> Vec<String> {
        let mut ordered: Vec<&Entry> = self.entries.iter().collect();
        ordered.sort_by_key(|e| e.seq);
        ordered.into_iter().map(|e| e.chunk_id.clone()).collect()
    }

    /// Add or replace the vector for `chunk_id`.
    ///
    /// Returns `true` if an existing vector was replaced.
    ///
    /// # Errors
    ///
    /// - [`RagError::DimensionMismatch`] if `embedding.len() != dimension()`
    /// - [`RagError::InvalidInput`] if the embedding contains NaN or infinity
    pub fn insert(&mut self, chunk_id: &str, embedding: &[f32]) -> Result<bool> {
        self.check_vector(embedding)?;
        let replaced = self.remove(chunk_id);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(chunk_id.to_string(), self.entries.len());
        self.entries.push(Entry { chunk_id: chunk_id.to_string(), vector: normalize(embedding), seq });
        Ok(replaced)
    }

    /// Remove the vector for `chunk_id`. Returns whether one was stored.
    pub fn remove(&mut self, chunk_id: &str) -> bool {
        let Some(slot) = self.slots.remove(chunk_id) else {
            return false;
        };
        self.entries.swap_remove(slot);
        if let Some(moved) = self.entries.get(slot) {
            self.slots.insert(moved.chunk_id.clone(), slot);
        }
        true
    }

    /// Remove every vector.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.slots.clear();
    }

    /// Return up to `k` entries most similar to `query`, best first.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] if `query.len() != dimension()`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        self.check_vector(query)?;
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        let query = normalize(query);

        let mut scored: Vec<(f32, u64, &str)> = self
            .entries
            .iter()
            .map(|e| (dot(&e.vector, &query), e.seq, e.chunk_id.as_str()))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal).then_with(|| a.1.cmp(&b.1))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, _, chunk_id)| ScoredChunk { chunk_id: chunk_id.to_string(), score })
            .collect())
    }

    /// Serialize the index to its durable byte representation.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut ordered: Vec<&Entry> = self.entries.iter().collect();
        ordered.sort_by_key(|e| e.seq);
        let snapshot = Snapshot {
            format: FORMAT.to_string(),
            version: FORMAT_VERSION,
            metric: METRIC.to_string(),
            dimension: self.dimension,
            entry_count: ordered.len(),
            entries: ordered
                .into_iter()
                .map(|e| SnapshotEntry { chunk_id: e.chunk_id.clone(), vector: e.vector.clone() })
                .collect(),
        };
        Ok(serde_json::to_vec(&snapshot)?)
    }

    /// Restore an index from bytes produced by [`to_bytes`](FlatIndex::to_bytes).
    ///
    /// Insertion order is preserved.
    ///
    /// # Errors
    ///
    /// - [`RagError::DimensionMismatch`] if the persisted dimension differs from
    ///   `expected_dimension`
    /// - [`RagError::CorruptIndex`] if the header, entry count, vector lengths
    ///   or ids are inconsistent
    pub fn from_bytes(bytes: &[u8], expected_dimension: usize) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)
            .map_err(|e| RagError::CorruptIndex(format!("unreadable index data: {e}")))?;

        if snapshot.format != FORMAT || snapshot.version != FORMAT_VERSION {
            return Err(RagError::CorruptIndex(format!(
                "unsupported index format {} v{}",
                snapshot.format, snapshot.version
            )));
        }
        if snapshot.metric != METRIC {
            return Err(RagError::CorruptIndex(format!("unsupported metric {}", snapshot.metric)));
        }
        if snapshot.dimension != expected_dimension {
            return Err(RagError::DimensionMismatch {
                expected: expected_dimension,
                actual: snapshot.dimension,
            });
        }
        if snapshot.entries.len() != snapshot.entry_count {
            return Err(RagError::CorruptIndex(format!(
                "header declares {} entries but {} are present",
                snapshot.entry_count,
                snapshot.entries.len()
            )));
        }

        let mut index = Self::new(snapshot.dimension);
        for entry in snapshot.entries {
            if entry.vector.len() != snapshot.dimension {
                return Err(RagError::CorruptIndex(format!(
                    "vector for chunk {} has {} components, expected {}",
                    entry.chunk_id,
                    entry.vector.len(),
                    snapshot.dimension
                )));
            }
            if index.contains(&entry.chunk_id) {
                return Err(RagError::CorruptIndex(format!(
                    "duplicate entry for chunk {}",
                    entry.chunk_id
                )));
            }
            index
                .insert(&entry.chunk_id, &entry.vector)
                .map_err(|e| RagError::CorruptIndex(e.to_string()))?;
        }
        Ok(index)
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(RagError::InvalidInput("embedding contains non-finite values".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    format: String,
    version: u32,
    metric: String,
    dimension: usize,
    entry_count: usize,
    entries: Vec<SnapshotEntry>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    chunk_id: String,
    vector: Embedding,
}

/// L2-normalize a vector. Zero vectors stay zero and score 0 against anything.
///
/// The norm is accumulated in `f64` so large finite components cannot
/// overflow it.
fn normalize(v: &[f32]) -> Embedding {
    let norm = v.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|&x| (f64::from(x) / norm) as f32).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, axis: usize) -> Embedding {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn exact_match_is_top_result_with_max_similarity() {
        let mut index = FlatIndex::new(4);
        index.insert("a", &[1.0, 2.0, 0.0, 0.0]).unwrap();
        index.insert("b", &[0.0, 0.0, 3.0, 1.0]).unwrap();
        let hits = index.search(&[1.0, 2.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].chunk_id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits[1].score < hits[0].score);
    }

    #[test]
    fn huge_components_still_match_themselves() {
        let mut index = FlatIndex::new(2);
        index.insert("b", &[0.5, 0.5]).unwrap();
        index.insert("a", &[1e20, 1e20]).unwrap();
        index.insert("c", &[3e38, -3e38]).unwrap();
        let results = index.search(&[1e20, 1e20], 3).unwrap();
        // "a" and "b" point the same way, "c" is orthogonal to both.
        let score = |id: &str| results.iter().find(|r| r.chunk_id == id).unwrap().score;
        assert!((score("a") - 1.0).abs() < 1e-6);
        assert!((score("b") - 1.0).abs() < 1e-6);
        assert_eq!(results[2].chunk_id, "c");
        assert!(score("c").abs() < 1e-6);

        let results = index.search(&[3e38, -3e38], 1).unwrap();
        assert_eq!(results[0].chunk_id, "c");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn replacing_keeps_size_and_drops_old_vector() {
        let mut index = FlatIndex::new(3);
        assert!(!index.insert("a", &unit(3, 0)).unwrap());
        index.insert("b", &unit(3, 2)).unwrap();
        assert!(index.insert("a", &unit(3, 1)).unwrap());
        assert_eq!(index.len(), 2);

        let hits = index.search(&unit(3, 0), 2).unwrap();
        assert!(hits.iter().all(|h| h.score.abs() < 1e-6), "stale vector still matches: {hits:?}");
        assert_eq!(index.search(&unit(3, 1), 1).unwrap()[0].chunk_id, "a");
    }

    #[test]
    fn remove_is_idempotent() {
        let mut index = FlatIndex::new(2);
        index.insert("a", &[1.0, 0.0]).unwrap();
        assert!(!index.remove("missing"));
        assert!(!index.remove("missing"));
        assert_eq!(index.len(), 1);
        assert!(index.remove("a"));
        assert!(!index.remove("a"));
        assert!(index.is_empty());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut index = FlatIndex::new(2);
        for id in ["first", "second", "third"] {
            index.insert(id, &[1.0, 0.0]).unwrap();
        }
        index.remove("first");
        index.insert("first", &[1.0, 0.0]).unwrap();
        let ids: Vec<String> =
            index.search(&[1.0, 0.0], 3).unwrap().into_iter().map(|h| h.chunk_id).collect();
        assert_eq!(ids, vec!["second", "third", "first"]);
    }

    #[test]
    fn returns_fewer_than_k_when_small() {
        let mut index = FlatIndex::new(2);
        index.insert("only", &[0.5, 0.5]).unwrap();
        assert_eq!(index.search(&[1.0, 0.0], 10).unwrap().len(), 1);
        assert!(FlatIndex::new(2).search(&[1.0, 0.0], 10).unwrap().is_empty());
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let mut index = FlatIndex::new(3);
        let err = index.insert("a", &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 3, actual: 2 }));
        assert!(matches!(
            index.search(&[1.0; 4], 1),
            Err(RagError::DimensionMismatch { expected: 3, actual: 4 })
        ));
        assert!(index.insert("nan", &[f32::NAN, 0.0, 0.0]).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn survives_a_byte_round_trip_in_order() {
        let mut index = FlatIndex::new(2);
        index.insert("x", &[1.0, 0.0]).unwrap();
        index.insert("y", &[1.0, 0.0]).unwrap();
        index.insert("z", &[0.0, 1.0]).unwrap();
        index.remove("x");
        index.insert("x", &[1.0, 0.0]).unwrap();

        let restored = FlatIndex::from_bytes(&index.to_bytes().unwrap(), 2).unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(restored.chunk_ids(), vec!["y", "z", "x"]);
        assert_eq!(
            restored.search(&[1.0, 0.0], 3).unwrap(),
            index.search(&[1.0, 0.0], 3).unwrap()
        );
    }

    #[test]
    fn load_fails_fast_on_dimension_mismatch() {
        let mut index = FlatIndex::new(2);
        index.insert("a", &[1.0, 0.0]).unwrap();
        let bytes = index.to_bytes().unwrap();
        assert!(matches!(
            FlatIndex::from_bytes(&bytes, 3),
            Err(RagError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn load_fails_fast_on_count_mismatch() {
        let bytes = br#"{"format":"docbase-index","version":1,"metric":"cosine","dimension":2,
            "entry_count":2,"entries":[{"chunk_id":"a","vector":[1.0,0.0]}]}"#;
        assert!(matches!(FlatIndex::from_bytes(bytes, 2), Err(RagError::CorruptIndex(_))));
    }

    #[test]
    fn load_rejects_bad_vectors_and_duplicates() {
        let short = br#"{"format":"docbase-index","version":1,"metric":"cosine","dimension":2,
            "entry_count":1,"entries":[{"chunk_id":"a","vector":[1.0]}]}"#;
        assert!(matches!(FlatIndex::from_bytes(short, 2), Err(RagError::CorruptIndex(_))));

        let duplicate = br#"{"format":"docbase-index","version":1,"metric":"cosine","dimension":1,
            "entry_count":2,"entries":[{"chunk_id":"a","vector":[1.0]},{"chunk_id":"a","vector":[1.0]}]}"#;
        assert!(matches!(FlatIndex::from_bytes(duplicate, 1), Err(RagError::CorruptIndex(_))));

        assert!(matches!(FlatIndex::from_bytes(b"not json", 1), Err(RagError::CorruptIndex(_))));
    }
}
