//! `docchat chat`: the interactive question loop.
//!
//! Reads questions from stdin until `exit` (any case), end of input, or
//! Ctrl-C. Answers stream to stdout as they are generated. Ctrl-C while an
//! answer is streaming stops it, keeps the partial text in the session, and
//! ends the loop.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use tokio::sync::mpsc;

use docchat_core::models::{Chunk, ScoredChunk};
use docchat_core::EmbeddingProvider;

use crate::answer::{AnswerEngine, EngineSettings};
use crate::config::Config;
use crate::error::Error;
use crate::ingest::load_corpus_chunks;
use crate::llm::LanguageModel;
use crate::progress::ProgressReporter;
use crate::retriever::{self, BuildOptions, IndexSource, Retriever};
use crate::session::SessionStore;
use crate::vector_store::VectorStore;

const PROMPT: &str = "Enter your question (or type 'exit' to quit): ";

/// Load the index for `docs`, building it first when absent or when
/// `rebuild` is set.
pub async fn prepare_retriever(
    config: &Config,
    docs: &Path,
    rebuild: bool,
    embedder: Arc<dyn EmbeddingProvider>,
    progress: &dyn ProgressReporter,
) -> Result<Retriever> {
    if !docs.exists() {
        return Err(Error::CorpusNotFound(docs.to_path_buf()).into());
    }
    let store = VectorStore::new(&config.index.dir);
    let store_id = &config.index.store_id;
    let options = BuildOptions::from_config(&config.embedding);

    let retriever = if rebuild {
        let chunks = corpus_chunks(config, docs, progress).await?;
        retriever::rebuild(&store, store_id, embedder, &options, progress, chunks).await?
    } else {
        let (retriever, source) = retriever::open_or_build(
            &store,
            store_id,
            embedder,
            &options,
            progress,
            || corpus_chunks(config, docs, progress),
        )
        .await?;
        if source == IndexSource::Loaded {
            tracing::info!("using existing index; pass --rebuild to re-ingest {}", docs.display());
        }
        retriever
    };

    Ok(retriever.with_min_score(config.retrieval.min_score))
}

async fn corpus_chunks(
    config: &Config,
    docs: &Path,
    progress: &dyn ProgressReporter,
) -> crate::error::Result<Vec<Chunk>> {
    let (report, chunks) = load_corpus_chunks(config, docs, progress).await?;
    if !report.failures.is_empty() {
        eprintln!(
            "{} file(s) could not be read and were skipped:",
            report.failures.len()
        );
        for failure in report.failures {
            eprintln!("  - {}", Error::from(failure));
        }
    }
    tracing::info!(
        "{} documents, {} chunks from {}",
        report.documents.len(),
        chunks.len(),
        docs.display()
    );
    Ok(chunks)
}

pub async fn run_chat(
    config: &Config,
    retriever: Retriever,
    llm: Arc<dyn LanguageModel>,
    session_id: String,
) -> Result<()> {
    let chunk_count = retriever.index().len();
    let engine = AnswerEngine::new(
        Arc::new(retriever),
        llm,
        Arc::new(SessionStore::new(config.chat.max_turns_per_session)),
        EngineSettings::from_config(config),
    );
    tracing::info!("chat session {} over {} chunks", session_id, chunk_count);

    let mut lines = stdin_lines();

    loop {
        print!("{}", PROMPT);
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.recv() => line.transpose()?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") {
            break;
        }

        let asked = tokio::select! {
            asked = engine.ask(&session_id, question) => asked,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let mut stream = match asked {
            Ok(stream) => stream,
            Err(e) if ends_chat(&e) => return Err(e.into()),
            Err(e) => {
                eprintln!("error: {}", e);
                continue;
            }
        };

        print!("Answer: ");
        std::io::stdout().flush()?;
        let interrupted = loop {
            tokio::select! {
                delta = stream.next() => match delta {
                    Some(Ok(text)) => {
                        print!("{}", text);
                        std::io::stdout().flush()?;
                    }
                    Some(Err(e)) => {
                        eprintln!("\nerror: {}", e);
                        break false;
                    }
                    None => break false,
                },
                _ = tokio::signal::ctrl_c() => break true,
            }
        };
        println!();

        let sources = format_sources(stream.retrieved());
        if interrupted {
            stream.cancel();
            eprintln!("(answer interrupted)");
            break;
        }
        if !sources.is_empty() {
            println!("Sources: {}", sources);
        }
        println!();
    }

    Ok(())
}

/// Errors that will recur on every later question.
fn ends_chat(err: &Error) -> bool {
    matches!(err, Error::EmbeddingSpaceMismatch { .. })
}

/// Stdin lines, read on a plain thread so a pending read never holds up
/// runtime shutdown. The channel closes at end of input.
fn stdin_lines() -> mpsc::Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let failed = line.is_err();
            if tx.blocking_send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

/// Distinct origins in rank order, with page/slide/sheet when known.
pub fn format_sources(retrieved: &[ScoredChunk]) -> String {
    let mut seen: Vec<String> = Vec::new();
    for hit in retrieved {
        let meta = &hit.chunk.metadata;
        let label = match (meta.get("page"), meta.get("slide"), meta.get("sheet")) {
            (Some(p), _, _) => format!("{} (page {})", hit.chunk.origin, p),
            (_, Some(s), _) => format!("{} (slide {})", hit.chunk.origin, s),
            (_, _, Some(s)) => format!("{} (sheet {})", hit.chunk.origin, s),
            _ => hit.chunk.origin.clone(),
        };
        if !seen.contains(&label) {
            seen.push(label);
        }
    }
    seen.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn hit(origin: &str, meta: &[(&str, &str)]) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: "x".to_string(),
                origin: origin.to_string(),
                ordinal: 0,
                text: String::new(),
                hash: String::new(),
                metadata: meta
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            },
            score: 1.0,
        }
    }

    #[test]
    fn space_mismatch_ends_chat() {
        assert!(ends_chat(&Error::EmbeddingSpaceMismatch {
            index: "all-minilm (384 dims)".to_string(),
            provider: "hash-128 (128 dims)".to_string(),
        }));
        assert!(!ends_chat(&Error::llm("connection refused")));
        assert!(!ends_chat(&Error::embedding("timeout")));
    }

    #[test]
    fn sources_are_deduplicated_in_rank_order() {
        let hits = vec![
            hit("b.pdf", &[("page", "2")]),
            hit("a.txt", &[]),
            hit("b.pdf", &[("page", "2")]),
            hit("deck.pptx", &[("slide", "3")]),
        ];
        assert_eq!(
            format_sources(&hits),
            "b.pdf (page 2), a.txt, deck.pptx (slide 3)"
        );
        assert_eq!(format_sources(&[]), "");
    }
}
