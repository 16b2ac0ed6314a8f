//! # docchat
//!
//! Chat with a local document corpus.
//!
//! docchat walks a directory of mixed-format documents (text, PDF, Word,
//! PowerPoint, spreadsheets, CSV, JSON, XML, images, and ZIP archives of
//! any of these), splits the extracted text into overlapping chunks, embeds
//! them into a persisted vector index, and answers questions in multi-turn
//! sessions. Follow-up questions are rewritten into standalone queries
//! before retrieval, and answers stream from a local Ollama model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Extraction  │──▶│   Chunker   │──▶│ Vector index │
//! │ fmt + zip    │   │ + embedding │   │   (SQLite)   │
//! └──────────────┘   └─────────────┘   └──────┬───────┘
//!                                             │
//!         ┌──────────┐   ┌───────────┐   ┌────▼─────┐
//!         │ Sessions │◀──│  Answer   │◀──│ Retriever│
//!         │          │   │  engine   │   │          │
//!         └──────────┘   └───────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat ingest --docs ./docs        # extract, chunk, embed, persist
//! docchat search "deployment"         # raw top-k chunks
//! docchat chat                        # interactive Q&A
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`format`] | File format detection |
//! | [`extract`] | Per-format text extraction |
//! | [`archive`] | Bounded ZIP expansion |
//! | [`ingest`] | Corpus traversal and extraction pipeline |
//! | [`embedding`] | Embedding providers and batching |
//! | [`vector_store`] | SQLite persistence for indexes |
//! | [`retriever`] | Index build/load and similarity queries |
//! | [`llm`] | Language model access |
//! | [`rewrite`] | History-aware query rewriting |
//! | [`session`] | Conversation memory |
//! | [`answer`] | Streaming answer engine |
//!
//! Pure logic (chunking, the in-memory index, prompts, data models) lives
//! in the `docchat-core` crate.

pub mod answer;
pub mod archive;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod format;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod progress;
pub mod retriever;
pub mod rewrite;
pub mod search;
pub mod session;
pub mod vector_store;

pub use error::{Error, Result};
