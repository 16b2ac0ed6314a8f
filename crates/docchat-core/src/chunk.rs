//! Boundary-aware text chunker with overlap.
//!
//! Splits document text into bounded spans measured in [`SizeUnit`]s
//! (characters or whitespace-delimited words). Within each window the
//! splitter prefers, in order: a paragraph break (`\n\n`), a line break, a
//! sentence end, and any whitespace. Only when no boundary exists in the
//! second half of the window does it fall back to a hard cut.
//!
//! Every chunk after the first starts with the trailing `overlap` units of
//! its predecessor. Whitespace is preserved, so [`reconstruct`] restores
//! the original text exactly.
//!
//! Chunk IDs are derived from origin, ordinal, and text, so re-chunking the
//! same document yields identical references.

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::models::{Chunk, RawDocument};

/// Unit in which `max_size` and `overlap` are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    /// Unicode scalar values.
    #[default]
    Chars,
    /// A run of non-whitespace plus its trailing whitespace.
    Words,
}

/// Chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSettings {
    pub max_size: usize,
    pub overlap: usize,
    pub unit: SizeUnit,
}

impl ChunkSettings {
    pub fn new(max_size: usize, overlap: usize, unit: SizeUnit) -> Self {
        Self {
            max_size,
            overlap,
            unit,
        }
    }

    /// Requires `max_size > 0` and `overlap < max_size`.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == 0 {
            return Err("chunk max_size must be > 0".to_string());
        }
        if self.overlap >= self.max_size {
            return Err(format!(
                "chunk overlap ({}) must be smaller than max_size ({})",
                self.overlap, self.max_size
            ));
        }
        Ok(())
    }
}

/// Split text into overlapping spans.
///
/// Empty (or whitespace-only) text yields no spans. Text no longer than
/// `max_size` units yields exactly one span.
pub fn chunk_text(text: &str, settings: &ChunkSettings) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let offsets = unit_offsets(text, settings.unit);
    let total = offsets.len() - 1;
    let max = settings.max_size.max(1);
    let overlap = settings.overlap.min(max - 1);

    let mut spans = Vec::new();
    let mut start = 0usize;
    loop {
        let limit = (start + max).min(total);
        let end = if limit == total {
            total
        } else {
            best_boundary(text, &offsets, start, limit, overlap, max)
        };
        spans.push(text[offsets[start]..offsets[end]].to_string());
        if end == total {
            break;
        }
        start = end - overlap;
    }
    spans
}

/// Split a [`RawDocument`] into [`Chunk`]s carrying its origin and metadata.
pub fn chunk_document(doc: &RawDocument, settings: &ChunkSettings) -> Vec<Chunk> {
    chunk_text(&doc.text, settings)
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(doc, i as u32, text))
        .collect()
}

/// Rebuild the original text from chunks produced with the same settings.
pub fn reconstruct<S: AsRef<str>>(chunks: &[S], overlap: usize, unit: SizeUnit) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let text = chunk.as_ref();
        if i == 0 || overlap == 0 {
            out.push_str(text);
            continue;
        }
        let offsets = unit_offsets(text, unit);
        let skip = overlap.min(offsets.len() - 1);
        out.push_str(&text[offsets[skip]..]);
    }
    out
}

/// Byte offsets of every unit start, followed by `text.len()`.
fn unit_offsets(text: &str, unit: SizeUnit) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(text.len() / 4 + 2);
    match unit {
        SizeUnit::Chars => {
            offsets.extend(text.char_indices().map(|(i, _)| i));
        }
        SizeUnit::Words => {
            offsets.push(0);
            let mut prev_ws = false;
            let mut seen_word = false;
            for (i, c) in text.char_indices() {
                let ws = c.is_whitespace();
                if !ws && prev_ws && seen_word {
                    offsets.push(i);
                }
                if !ws {
                    seen_word = true;
                }
                prev_ws = ws;
            }
        }
    }
    if offsets.is_empty() {
        offsets.push(0);
    }
    offsets.push(text.len());
    offsets
}

/// Pick the split position in `[lo, limit]` with the strongest boundary,
/// preferring the furthest one on ties. `lo` keeps the next chunk's start
/// ahead of the current one.
fn best_boundary(
    text: &str,
    offsets: &[usize],
    start: usize,
    limit: usize,
    overlap: usize,
    max: usize,
) -> usize {
    let lo = (start + overlap + 1).max(start + (max + 1) / 2).min(limit);
    let mut best = limit;
    let mut best_rank = 0u8;
    for p in (lo..=limit).rev() {
        let rank = boundary_rank(&text[..offsets[p]]);
        if rank > best_rank {
            best_rank = rank;
            best = p;
            if rank == 4 {
                break;
            }
        }
    }
    best
}

fn boundary_rank(prefix: &str) -> u8 {
    if prefix.ends_with("\n\n") || prefix.ends_with("\r\n\r\n") {
        return 4;
    }
    if prefix.ends_with('\n') {
        return 3;
    }
    let mut tail = prefix.chars().rev();
    match (tail.next(), tail.next()) {
        (Some(last), Some(prev)) if last.is_whitespace() && matches!(prev, '.' | '!' | '?') => 2,
        (Some(last), _) if last.is_whitespace() => 1,
        _ => 0,
    }
}

fn make_chunk(doc: &RawDocument, ordinal: u32, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let mut id_hasher = Sha256::new();
    id_hasher.update(doc.origin.as_bytes());
    id_hasher.update([0u8]);
    id_hasher.update(ordinal.to_le_bytes());
    id_hasher.update([0u8]);
    id_hasher.update(hash.as_bytes());
    let id = format!("{:x}", id_hasher.finalize())[..32].to_string();

    Chunk {
        id,
        origin: doc.origin.clone(),
        ordinal,
        text,
        hash,
        metadata: doc.metadata.clone(),
    }
}
