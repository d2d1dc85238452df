//! Dense retrieval: brute-force cosine similarity over chunk embeddings.
//!
//! The Knowledge Base is sized for a single tenant's fiscal reference data
//! (tens of thousands of NCM/CEST/golden-set rows, not billions), so a
//! linear scan against an in-memory embedding table is simpler and more
//! auditable than standing up an external ANN engine, and keeps the
//! dependency stack aligned with what the rest of the crate already uses.

use serde::{Deserialize, Serialize};

/// One embedded chunk: a piece of KB text plus its source locator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk_id: String,
    pub source_table: String,
    pub source_key: String,
    pub embedding: Vec<f32>,
}

/// A scored dense-retrieval hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub source_table: String,
    pub source_key: String,
    pub score: f64,
}

/// In-memory brute-force cosine index over `EmbeddedChunk`s.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    chunks: Vec<EmbeddedChunk>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    pub fn from_chunks(chunks: Vec<EmbeddedChunk>) -> Self {
        Self { chunks }
    }

    pub fn insert(&mut self, chunk: EmbeddedChunk) {
        self.chunks.push(chunk);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Top-`k` nearest chunks to `query` by cosine similarity.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<VectorHit> {
        let mut scored: Vec<VectorHit> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                cosine_similarity(query, &chunk.embedding).map(|score| VectorHit {
                    chunk_id: chunk.chunk_id.clone(),
                    source_table: chunk.source_table.clone(),
                    source_key: chunk.source_key.clone(),
                    score,
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    Some((dot / (norm_a * norm_b)) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_most_similar_chunk_first() {
        let mut index = VectorIndex::new();
        index.insert(EmbeddedChunk {
            chunk_id: "a".into(),
            source_table: "ncm".into(),
            source_key: "30049069".into(),
            embedding: vec![1.0, 0.0, 0.0],
        });
        index.insert(EmbeddedChunk {
            chunk_id: "b".into(),
            source_table: "ncm".into(),
            source_key: "85167100".into(),
            embedding: vec![0.0, 1.0, 0.0],
        });

        let hits = index.search(&[0.9, 0.1, 0.0], 2);
        assert_eq!(hits[0].chunk_id, "a");
    }

    #[test]
    fn mismatched_dimensions_are_skipped() {
        let mut index = VectorIndex::new();
        index.insert(EmbeddedChunk {
            chunk_id: "a".into(),
            source_table: "ncm".into(),
            source_key: "x".into(),
            embedding: vec![1.0, 0.0],
        });
        assert!(index.search(&[1.0, 0.0, 0.0], 1).is_empty());
    }
}
