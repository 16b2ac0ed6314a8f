//! Error types for the docchat pipeline.
//!
//! Pipeline misconfiguration (missing corpus, mismatched embedding space)
//! is fatal and surfaces as an [`Error`]. Per-file extraction problems are
//! [`ExtractError`]s that the ingestion pipeline records and skips.

use std::path::PathBuf;

use thiserror::Error;

use docchat_core::index::IndexError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The ingestion root does not exist.
    #[error("The specified path does not exist: {}", .0.display())]
    CorpusNotFound(PathBuf),

    #[error("Failed to extract '{}': {source}", path.display())]
    Extraction {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },

    /// Query-time embedder differs from the one the index was built with.
    #[error("embedding space mismatch: index was built with {index}, provider is {provider}")]
    EmbeddingSpaceMismatch { index: String, provider: String },

    #[error("No persisted vector store named '{0}'")]
    StoreNotFound(String),

    #[error("Vector store is corrupt: {0}")]
    StoreCorrupt(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<IndexError> for Error {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::SpaceMismatch { index, provider } => {
                Error::EmbeddingSpaceMismatch { index, provider }
            }
            IndexError::DimensionMismatch { expected, actual } => Error::EmbeddingSpaceMismatch {
                index: format!("{} dims", expected),
                provider: format!("{} dims", actual),
            },
        }
    }
}

/// Failure to extract text from one file. Never aborts a batch.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("spreadsheet extraction failed: {0}")]
    Spreadsheet(String),

    #[error("CSV extraction failed: {0}")]
    Csv(String),

    #[error("JSON extraction failed: {0}")]
    Json(String),

    #[error("XML extraction failed: {0}")]
    Xml(String),

    #[error("archive expansion failed: {0}")]
    Archive(String),

    #[error("extractor panicked: {0}")]
    Panicked(String),
}
