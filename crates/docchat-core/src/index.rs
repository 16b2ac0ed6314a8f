//! In-memory vector index.
//!
//! Holds `(Chunk, vector)` pairs in insertion order together with the
//! [`EmbeddingSpace`] they were produced in. Search is brute-force cosine
//! similarity with a stable sort, so results are deterministic for a fixed
//! index and query vector and ties keep insertion order.

use thiserror::Error;

use crate::embedding::{cosine_similarity, EmbeddingSpace};
use crate::models::{Chunk, ScoredChunk};

#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    /// The provider used for a query is not the one the index was built with.
    #[error("embedding space mismatch: index was built with {index}, query uses {provider}")]
    SpaceMismatch { index: String, provider: String },

    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A stored chunk and its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Similarity-searchable set of chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    space: EmbeddingSpace,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new(space: EmbeddingSpace) -> Self {
        Self {
            space,
            entries: Vec::new(),
        }
    }

    /// Build an index from pre-computed entries, validating dimensions.
    pub fn from_entries(space: EmbeddingSpace, entries: Vec<IndexEntry>) -> Result<Self, IndexError> {
        let mut index = Self::new(space);
        for entry in entries {
            index.insert(entry.chunk, entry.vector)?;
        }
        Ok(index)
    }

    pub fn insert(&mut self, chunk: Chunk, vector: Vec<f32>) -> Result<(), IndexError> {
        if vector.len() != self.space.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.space.dims,
                actual: vector.len(),
            });
        }
        self.entries.push(IndexEntry { chunk, vector });
        Ok(())
    }

    pub fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check that vectors from `model` (with optional known `dims`) can be
    /// compared against this index.
    pub fn ensure_compatible(&self, model: &str, dims: Option<usize>) -> Result<(), IndexError> {
        let dims_differ = matches!(dims, Some(d) if d != self.space.dims);
        if model != self.space.model || dims_differ {
            return Err(IndexError::SpaceMismatch {
                index: self.space.to_string(),
                provider: match dims {
                    Some(d) => format!("{} ({} dims)", model, d),
                    None => model.to_string(),
                },
            });
        }
        Ok(())
    }

    /// Top-`k` entries by cosine similarity to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.space.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.space.dims,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.vector)))
            .collect();
        // Stable: equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect())
    }
}
