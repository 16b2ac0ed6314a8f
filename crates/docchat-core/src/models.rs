//! Core data models used throughout docchat.
//!
//! These types represent the documents, chunks, retrieval results, and
//! conversation turns that flow through the ingestion and answering
//! pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text extracted from one source file (or one page, slide, or sheet of it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDocument {
    /// Origin path as shown to users. Files expanded from an archive use
    /// `archive.zip/inner/path` so attribution survives temp-dir cleanup.
    pub origin: String,
    pub text: String,
    /// Format-specific metadata such as `page`, `slide`, or `sheet`.
    pub metadata: BTreeMap<String, String>,
}

impl RawDocument {
    pub fn new(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// A bounded span of a [`RawDocument`]'s text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic identifier derived from origin, ordinal, and text.
    pub id: String,
    pub origin: String,
    /// Position of this chunk within its document, starting at 0.
    pub ordinal: u32,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    pub fn reference(&self) -> ChunkRef {
        ChunkRef {
            chunk_id: self.id.clone(),
            origin: self.origin.clone(),
            ordinal: self.ordinal,
        }
    }
}

/// Attribution for a retrieved chunk, stored in conversation turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub chunk_id: String,
    pub origin: String,
    pub ordinal: u32,
}

/// A chunk returned from a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

/// One question/answer exchange in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub utterance: String,
    pub standalone_query: String,
    pub retrieved: Vec<ChunkRef>,
    pub answer: String,
    /// False when generation was cancelled or failed and only a partial
    /// answer was recorded.
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

/// Ordered conversation history for one session identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub turns: Vec<Turn>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            turns: Vec::new(),
        }
    }

    /// Append a turn, dropping the oldest turns beyond `max_turns`.
    /// `max_turns == 0` means unbounded.
    pub fn push_turn(&mut self, turn: Turn, max_turns: usize) {
        self.turns.push(turn);
        if max_turns > 0 && self.turns.len() > max_turns {
            let excess = self.turns.len() - max_turns;
            self.turns.drain(..excess);
        }
    }

    /// The last `window` turns in chronological order.
    pub fn recent(&self, window: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(window);
        &self.turns[start..]
    }
}
