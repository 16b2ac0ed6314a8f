//! Embedding providers and batched chunk embedding.
//!
//! Two backends implement [`EmbeddingProvider`]:
//!
//! - **[`OllamaEmbedder`]** — calls `POST {url}/api/embed` on a local Ollama
//!   server, with retry and backoff.
//! - **[`HashingEmbedder`]** — deterministic feature hashing, no network.
//!   Useful offline and in tests; quality is bag-of-words level.
//!
//! [`embed_texts`] splits a corpus into batches, embeds them concurrently,
//! and writes each result back to the slot its batch came from.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use docchat_core::embedding::normalize;
use docchat_core::EmbeddingProvider;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::http;
use crate::progress::{IngestProgressEvent, ProgressReporter};

/// Default dimensionality of [`HashingEmbedder`] vectors.
pub const DEFAULT_HASH_DIMS: usize = 256;

pub struct OllamaEmbedder {
    model: String,
    dims: Option<usize>,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            url: format!("{}/api/embed", http::ollama_base_url(config.url.as_deref())),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = http::post_json_with_retry(&self.client, &self.url, &body, self.max_retries)
            .await
            .map_err(Error::embedding)?;
        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::embedding(format!("invalid /api/embed response: {}", e)))?;
        Ok(parsed.embeddings)
    }
}

/// Signed feature hashing over lower-cased alphanumeric tokens.
pub struct HashingEmbedder {
    model: String,
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            model: format!("hash-{}", dims),
            dims,
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let slot = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[slot] += sign;
        }
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        Some(self.dims)
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Create the provider named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"hash"` | [`HashingEmbedder`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "hash" => Ok(Arc::new(HashingEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        other => Err(Error::config(format!(
            "Unknown embedding provider: '{}'. Must be ollama or hash.",
            other
        ))),
    }
}

/// Embed `texts` in batches of `batch_size`, at most `concurrency` batches
/// in flight. Output order matches input order.
pub async fn embed_texts(
    embedder: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
    concurrency: usize,
    progress: &dyn ProgressReporter,
) -> Result<Vec<Vec<f32>>> {
    let total = texts.len();
    let batch_size = batch_size.max(1);
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; total];

    let mut batches = stream::iter(texts.chunks(batch_size).enumerate().map(|(i, batch)| {
        let offset = i * batch_size;
        async move { (offset, batch.len(), embedder.embed(batch).await) }
    }))
    .buffer_unordered(concurrency.max(1));

    let mut dims = embedder.dims();
    let mut done = 0usize;
    while let Some((offset, expected, result)) = batches.next().await {
        let vectors = result.map_err(|e| Error::embedding(format!("{:#}", e)))?;
        if vectors.len() != expected {
            return Err(Error::embedding(format!(
                "expected {} vectors, got {}",
                expected,
                vectors.len()
            )));
        }
        for (j, vector) in vectors.into_iter().enumerate() {
            match dims {
                Some(d) if d != vector.len() => {
                    return Err(Error::embedding(format!(
                        "vector has {} dimensions, expected {}",
                        vector.len(),
                        d
                    )));
                }
                Some(_) => {}
                None => dims = Some(vector.len()),
            }
            slots[offset + j] = Some(vector);
        }
        done += expected;
        progress.report(IngestProgressEvent::Embedding {
            n: done as u64,
            total: total as u64,
        });
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| Error::internal(format!("no vector for input {}", i))))
        .collect()
}

/// Embed a single query string.
pub async fn embed_query(embedder: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let vectors = embedder
        .embed(&[text.to_string()])
        .await
        .map_err(|e| Error::embedding(format!("{:#}", e)))?;
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| Error::embedding("empty embedding response"))
}
