//! # docchat CLI
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat ingest` | Extract, chunk, and index the corpus (reuses an existing index) |
//! | `docchat search "<query>"` | Print the top-k matching chunks |
//! | `docchat chat` | Interactive question loop over the corpus |
//!
//! When the config file does not exist, built-in defaults are used:
//! corpus `./docs`, index `./docchat_db`, Ollama models `tinyllama` and
//! `all-minilm`.

use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docchat::progress::ProgressMode;
use docchat::{chat, config, embedding, ingest, llm, search};

/// docchat: ask questions about a folder of documents.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "docchat: chat with a local document corpus",
    version,
    long_about = "docchat extracts text from a folder of mixed-format documents (including ZIP \
    archives), indexes it in a local vector store, and answers questions in multi-turn \
    sessions using a local Ollama model."
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    /// Progress on stderr: human, json, or off. Defaults to human on a TTY.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and index the corpus.
    Ingest {
        /// Corpus directory or file (overrides `ingest.docs`).
        #[arg(long)]
        docs: Option<PathBuf>,

        /// Re-ingest and replace the existing index.
        #[arg(long)]
        rebuild: bool,

        /// Extract and chunk only; do not embed or write the index.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the chunks most similar to a query.
    Search {
        query: String,

        /// Number of results (overrides `retrieval.k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Ask questions interactively.
    Chat {
        /// Answering model (overrides `llm.model`).
        #[arg(long)]
        model: Option<String>,

        /// Embedding model (overrides `embedding.model`).
        #[arg(long)]
        embedding_model: Option<String>,

        #[arg(long)]
        docs: Option<PathBuf>,

        /// Session id; a random one is used when unset.
        #[arg(long)]
        session: Option<String>,

        #[arg(long)]
        rebuild: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docchat=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let progress_mode = match cli.progress.as_deref() {
        None => ProgressMode::default_for_tty(),
        Some(s) => match ProgressMode::parse(s) {
            Some(mode) => mode,
            None => bail!("Unknown progress mode: '{}'. Use human, json, or off.", s),
        },
    };
    let progress = progress_mode.reporter();

    let mut cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            docs,
            rebuild,
            dry_run,
        } => {
            let docs = docs.unwrap_or_else(|| cfg.ingest.docs.clone());
            let embedder = embedding::create_provider(&cfg.embedding)?;
            ingest::run_ingest(&cfg, &docs, rebuild, dry_run, embedder, progress.as_ref()).await?;
        }
        Commands::Search { query, k } => {
            if k == Some(0) {
                bail!("--k must be >= 1");
            }
            let embedder = embedding::create_provider(&cfg.embedding)?;
            search::run_search(&cfg, &query, k, embedder).await?;
        }
        Commands::Chat {
            model,
            embedding_model,
            docs,
            session,
            rebuild,
        } => {
            if let Some(model) = model {
                cfg.llm.model = model;
            }
            if let Some(model) = embedding_model {
                cfg.embedding.model = model;
            }
            cfg.validate()?;

            let docs = docs.unwrap_or_else(|| cfg.ingest.docs.clone());
            let embedder = embedding::create_provider(&cfg.embedding)?;
            let llm = llm::create_model(&cfg.llm)?;
            let retriever =
                chat::prepare_retriever(&cfg, &docs, rebuild, embedder, progress.as_ref()).await?;

            let session_id = session
                .or_else(|| cfg.chat.session_id.clone())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            chat::run_chat(&cfg, retriever, llm, session_id).await?;
        }
    }

    Ok(())
}
