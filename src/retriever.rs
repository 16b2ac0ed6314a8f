//! Similarity retrieval over a persisted index.
//!
//! A [`Retriever`] pairs a [`VectorIndex`] with the embedder that built it.
//! Attaching an embedder from a different [`EmbeddingSpace`] fails, so every
//! query vector is comparable with the stored ones.
//!
//! Index lifecycle:
//! - [`open_or_build`] reuses `<store_id>.sqlite` when it exists (no
//!   embedding calls) and otherwise ingests, embeds, and saves.
//! - [`rebuild`] always embeds the given chunks and replaces the store.

use std::future::Future;
use std::sync::Arc;

use docchat_core::index::VectorIndex;
use docchat_core::models::{Chunk, ScoredChunk};
use docchat_core::{EmbeddingProvider, EmbeddingSpace};

use crate::config::EmbeddingConfig;
use crate::embedding::{embed_query, embed_texts};
use crate::error::{Error, Result};
use crate::progress::ProgressReporter;
use crate::vector_store::VectorStore;

pub struct Retriever {
    index: VectorIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    min_score: Option<f32>,
}

impl Retriever {
    /// Pair `index` with `embedder`, failing if they live in different spaces.
    pub fn attach(index: VectorIndex, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        // An empty index built before the dimensionality was known only pins the model.
        let dims = if index.is_empty() && index.space().dims == 0 {
            None
        } else {
            embedder.dims()
        };
        index.ensure_compatible(embedder.model_name(), dims)?;
        Ok(Self {
            index,
            embedder,
            min_score: None,
        })
    }

    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Top-`k` chunks for `text`, best first. An empty index or `k == 0`
    /// returns nothing without calling the embedder.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let vector = embed_query(self.embedder.as_ref(), text).await?;
        let mut hits = self.index.search(&vector, k)?;
        if let Some(min) = self.min_score {
            hits.retain(|hit| hit.score >= min);
        }
        Ok(hits)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub batch_size: usize,
    pub concurrency: usize,
}

impl BuildOptions {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            concurrency: config.concurrency,
        }
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from_config(&EmbeddingConfig::default())
    }
}

/// Embed `chunks` and assemble an index in chunk order.
pub async fn build_index(
    chunks: Vec<Chunk>,
    embedder: &dyn EmbeddingProvider,
    options: &BuildOptions,
    progress: &dyn ProgressReporter,
) -> Result<VectorIndex> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_texts(
        embedder,
        &texts,
        options.batch_size,
        options.concurrency,
        progress,
    )
    .await?;

    let dims = vectors
        .first()
        .map(|v| v.len())
        .or_else(|| embedder.dims())
        .unwrap_or(0);
    let mut index = VectorIndex::new(EmbeddingSpace::new(embedder.model_name(), dims));
    for (chunk, vector) in chunks.into_iter().zip(vectors) {
        index.insert(chunk, vector)?;
    }
    Ok(index)
}

/// Whether [`open_or_build`] reused a persisted store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    Loaded,
    Built,
}

/// Load an existing store and attach `embedder`.
pub async fn open_existing(
    store: &VectorStore,
    store_id: &str,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<Retriever> {
    let index = store.load(store_id).await?;
    Retriever::attach(index, embedder)
}

/// Reuse the store `store_id` if present; otherwise call `corpus` for
/// chunks, build, and save.
pub async fn open_or_build<F, Fut>(
    store: &VectorStore,
    store_id: &str,
    embedder: Arc<dyn EmbeddingProvider>,
    options: &BuildOptions,
    progress: &dyn ProgressReporter,
    corpus: F,
) -> Result<(Retriever, IndexSource)>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Chunk>>>,
{
    match open_existing(store, store_id, embedder.clone()).await {
        Ok(retriever) => {
            tracing::info!(
                "reusing index '{}' ({} chunks)",
                store_id,
                retriever.index().len()
            );
            return Ok((retriever, IndexSource::Loaded));
        }
        Err(Error::StoreNotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let chunks = corpus().await?;
    let retriever = rebuild(store, store_id, embedder, options, progress, chunks).await?;
    Ok((retriever, IndexSource::Built))
}

/// Embed `chunks`, replace the store `store_id`, and return a retriever.
pub async fn rebuild(
    store: &VectorStore,
    store_id: &str,
    embedder: Arc<dyn EmbeddingProvider>,
    options: &BuildOptions,
    progress: &dyn ProgressReporter,
    chunks: Vec<Chunk>,
) -> Result<Retriever> {
    tracing::info!("building index '{}' from {} chunks", store_id, chunks.len());
    let index = build_index(chunks, embedder.as_ref(), options, progress).await?;
    store.save(store_id, &index).await?;
    Retriever::attach(index, embedder)
}
