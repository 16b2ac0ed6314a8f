//! # docchat core
//!
//! Shared, I/O-free logic for docchat: data models, the overlapping
//! chunker, the embedding trait and vector utilities, the in-memory vector
//! index, and the prompt templates used by the conversational engine.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network access.
//! The `docchat` app crate supplies extractors, providers, persistence,
//! and the CLI.

pub mod chunk;
pub mod embedding;
pub mod index;
pub mod models;
pub mod prompt;

pub use chunk::{chunk_document, chunk_text, reconstruct, ChunkSettings, SizeUnit};
pub use embedding::{EmbeddingProvider, EmbeddingSpace};
pub use index::{IndexEntry, IndexError, VectorIndex};
pub use models::{Chunk, ChunkRef, RawDocument, ScoredChunk, Session, Turn};
