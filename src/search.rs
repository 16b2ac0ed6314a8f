//! `docchat search`: raw top-k retrieval from the persisted index.

use std::sync::Arc;

use anyhow::{bail, Result};

use docchat_core::models::ScoredChunk;
use docchat_core::EmbeddingProvider;

use crate::config::Config;
use crate::error::Error;
use crate::retriever;
use crate::vector_store::VectorStore;

const EXCERPT_CHARS: usize = 160;

pub async fn run_search(
    config: &Config,
    query: &str,
    k: Option<usize>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let store = VectorStore::new(&config.index.dir);
    let retriever = match retriever::open_existing(&store, &config.index.store_id, embedder).await {
        Ok(r) => r.with_min_score(config.retrieval.min_score),
        Err(Error::StoreNotFound(id)) => bail!(
            "No index named '{}' in {}. Run `docchat ingest` first.",
            id,
            config.index.dir.display()
        ),
        Err(e) => return Err(e.into()),
    };

    let results = retriever
        .query(query, k.unwrap_or(config.retrieval.k))
        .await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        print_result(i + 1, result);
    }
    Ok(())
}

fn print_result(rank: usize, result: &ScoredChunk) {
    let chunk = &result.chunk;
    println!("{}. [{:.2}] {} #{}", rank, result.score, chunk.origin, chunk.ordinal);
    for key in ["page", "slide", "sheet"] {
        if let Some(value) = chunk.metadata.get(key) {
            println!("    {}: {}", key, value);
        }
    }
    println!("    excerpt: \"{}\"", excerpt(&chunk.text));
    println!("    id: {}", chunk.id);
    println!();
}

fn excerpt(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat.to_string(),
    }
}
