//! TOML configuration.
//!
//! Every section has defaults, so an absent config file yields a working
//! setup against a local Ollama (`tinyllama` for answers, `all-minilm` for
//! embeddings). See [`load_config`] for validation rules.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docchat_core::chunk::{ChunkSettings, SizeUnit};

use crate::archive::ArchiveLimits;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Corpus root (directory or single file).
    #[serde(default = "default_docs")]
    pub docs: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Files extracted in parallel.
    #[serde(default = "default_ingest_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_archive_depth")]
    pub max_archive_depth: usize,
    #[serde(default = "default_max_archive_entries")]
    pub max_archive_entries: usize,
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            docs: default_docs(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            concurrency: default_ingest_concurrency(),
            max_archive_depth: default_max_archive_depth(),
            max_archive_entries: default_max_archive_entries(),
            max_archive_bytes: default_max_archive_bytes(),
        }
    }
}

impl IngestConfig {
    pub fn archive_limits(&self) -> ArchiveLimits {
        ArchiveLimits {
            max_depth: self.max_archive_depth,
            max_entries: self.max_archive_entries,
            max_bytes: self.max_archive_bytes,
        }
    }
}

fn default_docs() -> PathBuf {
    PathBuf::from("./docs")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_ingest_concurrency() -> usize {
    4
}
fn default_max_archive_depth() -> usize {
    4
}
fn default_max_archive_entries() -> usize {
    10_000
}
fn default_max_archive_bytes() -> u64 {
    512 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default)]
    pub overlap: usize,
    #[serde(default)]
    pub unit: SizeUnit,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            overlap: 0,
            unit: SizeUnit::Chars,
        }
    }
}

impl ChunkingConfig {
    pub fn settings(&self) -> ChunkSettings {
        ChunkSettings::new(self.max_size, self.overlap, self.unit)
    }
}

fn default_max_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `ollama` or `hash`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Embedding requests in flight at once.
    #[serde(default = "default_embedding_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            concurrency: default_embedding_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "all-minilm".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_embedding_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "tinyllama".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding persisted stores.
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_store_id")]
    pub store_id: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            store_id: default_store_id(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./docchat_db")
}
fn default_store_id() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    /// Drop hits scoring below this cosine similarity.
    #[serde(default)]
    pub min_score: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            min_score: None,
        }
    }
}

fn default_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Turns of history shown to the query rewriter.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Oldest turns are dropped past this count. 0 = unbounded.
    #[serde(default = "default_max_turns")]
    pub max_turns_per_session: usize,
    /// Fixed session id for the CLI loop; a random one is used when unset.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_turns_per_session: default_max_turns(),
            session_id: None,
        }
    }
}

fn default_history_window() -> usize {
    10
}
fn default_max_turns() -> usize {
    50
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to built-in defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!("config {} not found, using defaults", path.display());
        Ok(Config::default())
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.chunking
            .settings()
            .validate()
            .map_err(|e| anyhow::anyhow!("chunking: {}", e))?;

        if self.retrieval.k == 0 {
            anyhow::bail!("retrieval.k must be >= 1");
        }
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be >= 1");
        }
        if self.embedding.concurrency == 0 || self.ingest.concurrency == 0 {
            anyhow::bail!("concurrency settings must be >= 1");
        }
        if self.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0");
        }
        if self.embedding.model.trim().is_empty() || self.llm.model.trim().is_empty() {
            anyhow::bail!("embedding.model and llm.model must not be empty");
        }

        match self.embedding.provider.as_str() {
            "ollama" | "hash" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be ollama or hash.",
                other
            ),
        }
        match self.llm.provider.as_str() {
            "ollama" => {}
            other => anyhow::bail!("Unknown llm provider: '{}'. Must be ollama.", other),
        }

        crate::vector_store::validate_store_id(&self.index.store_id)
            .map_err(|e| anyhow::anyhow!("index.store_id: {}", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_setup() {
        let cfg = Config::default();
        assert_eq!(cfg.chunking.max_size, 100);
        assert_eq!(cfg.chunking.overlap, 0);
        assert_eq!(cfg.retrieval.k, 3);
        assert_eq!(cfg.llm.model, "tinyllama");
        assert_eq!(cfg.embedding.model, "all-minilm");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [chunking]
            max_size = 50
            overlap = 10
            unit = "words"

            [embedding]
            provider = "hash"
            dims = 64
            "#,
        )
        .unwrap();
        assert_eq!(cfg.chunking.unit, SizeUnit::Words);
        assert_eq!(cfg.embedding.dims, Some(64));
        assert_eq!(cfg.index.store_id, "default");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn overlap_must_be_below_max_size() {
        let cfg: Config = toml::from_str("[chunking]\nmax_size = 10\noverlap = 10\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_provider_rejected() {
        let cfg: Config = toml::from_str("[embedding]\nprovider = \"nope\"\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn store_id_must_be_a_plain_name() {
        let cfg: Config = toml::from_str("[index]\nstore_id = \"../escape\"\n").unwrap();
        assert!(cfg.validate().is_err());
    }
}
