//! Corpus ingestion.
//!
//! Turns a directory tree (or single file) into [`RawDocument`]s:
//! traversal → archive expansion → format dispatch → extraction. Files that
//! fail to extract are recorded in the [`IngestReport`] and never abort the
//! batch; a missing root is the only fatal condition.
//!
//! Traversal is sorted by file name, archive contents are spliced into the
//! walk in place of the archive, and extraction runs concurrently while
//! results keep traversal order.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use docchat_core::chunk::{chunk_document, ChunkSettings};
use docchat_core::models::{Chunk, RawDocument};
use docchat_core::EmbeddingProvider;

use crate::archive::{ArchiveLimits, ExpansionScope};
use crate::config::{Config, IngestConfig};
use crate::error::{Error, ExtractError, Result};
use crate::extract::ExtractorRegistry;
use crate::format::{FileFormat, SourceFile};
use crate::progress::{IngestProgressEvent, ProgressReporter};
use crate::retriever::{self, BuildOptions};
use crate::vector_store::VectorStore;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
    /// Files extracted in parallel.
    pub concurrency: usize,
    pub archive_limits: ArchiveLimits,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

impl IngestOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            include_globs: config.include_globs.clone(),
            exclude_globs: config.exclude_globs.clone(),
            follow_symlinks: config.follow_symlinks,
            concurrency: config.concurrency.max(1),
            archive_limits: config.archive_limits(),
        }
    }
}

/// A file that could not be turned into documents.
#[derive(Debug)]
pub struct ExtractionFailure {
    /// Origin path (archive members use `archive.zip/inner`).
    pub path: PathBuf,
    pub error: ExtractError,
}

impl From<ExtractionFailure> for Error {
    fn from(failure: ExtractionFailure) -> Self {
        Error::Extraction {
            path: failure.path,
            source: failure.error,
        }
    }
}

#[derive(Debug, Default)]
pub struct IngestReport {
    /// Documents in traversal order.
    pub documents: Vec<RawDocument>,
    pub failures: Vec<ExtractionFailure>,
    /// Origins of files with no extractor.
    pub skipped: Vec<String>,
    /// Files handed to an extractor (archive members included).
    pub files_seen: usize,
}

/// Walk `root` and extract every supported file.
pub async fn ingest_corpus(
    root: &Path,
    options: &IngestOptions,
    registry: Arc<ExtractorRegistry>,
    progress: &dyn ProgressReporter,
) -> Result<IngestReport> {
    if !root.exists() {
        return Err(Error::CorpusNotFound(root.to_path_buf()));
    }

    progress.report(IngestProgressEvent::Discovering {
        root: root.display().to_string(),
    });

    let plan = {
        let root = root.to_path_buf();
        let options = options.clone();
        tokio::task::spawn_blocking(move || plan_corpus(&root, &options))
            .await
            .map_err(|e| Error::internal(format!("traversal task failed: {}", e)))??
    };
    let Plan {
        files,
        skipped,
        mut failures,
        scope,
    } = plan;

    let total = files.len() as u64;
    tracing::info!(
        "extracting {} files ({} skipped, {} archive dirs)",
        total,
        skipped.len(),
        scope.dirs().count()
    );

    let mut results = stream::iter(files.into_iter().map(|file| {
        let registry = registry.clone();
        async move {
            let job = file.clone();
            let outcome = tokio::task::spawn_blocking(move || registry.extract(&job))
                .await
                .unwrap_or_else(|e| Err(ExtractError::Panicked(e.to_string())));
            (file, outcome)
        }
    }))
    .buffered(options.concurrency.max(1));

    let mut documents = Vec::new();
    let mut done = 0u64;
    while let Some((file, outcome)) = results.next().await {
        done += 1;
        match outcome {
            Ok(docs) => {
                tracing::debug!("{}: {} document(s)", file.origin, docs.len());
                documents.extend(docs);
            }
            Err(error) => {
                tracing::warn!("skipping {}: {}", file.origin, error);
                failures.push(ExtractionFailure {
                    path: PathBuf::from(&file.origin),
                    error,
                });
            }
        }
        progress.report(IngestProgressEvent::Extracting { n: done, total });
    }

    drop(scope);

    Ok(IngestReport {
        documents,
        failures,
        skipped,
        files_seen: total as usize,
    })
}

/// Chunk every document, preserving document order.
pub fn chunk_corpus(documents: &[RawDocument], settings: &ChunkSettings) -> Vec<Chunk> {
    documents
        .iter()
        .flat_map(|doc| chunk_document(doc, settings))
        .collect()
}

struct Plan {
    files: Vec<SourceFile>,
    skipped: Vec<String>,
    failures: Vec<ExtractionFailure>,
    /// Keeps expanded archive contents alive until extraction finishes.
    scope: ExpansionScope,
}

struct Pending {
    path: PathBuf,
    origin: String,
    /// Archive nesting level of the tree this file lives in (corpus = 0).
    depth: usize,
}

fn plan_corpus(root: &Path, options: &IngestOptions) -> Result<Plan> {
    let include = build_globset(&options.include_globs)?;
    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(options.exclude_globs.iter().cloned());
    let exclude = build_globset(&excludes)?;

    let mut failures = Vec::new();
    let mut queue: VecDeque<Pending> = if root.is_file() {
        let origin = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string());
        VecDeque::from([Pending {
            path: root.to_path_buf(),
            origin,
            depth: 0,
        }])
    } else {
        let listing = list_tree(root, "", options.follow_symlinks, Some((&include, &exclude)))?;
        failures.extend(listing.failures);
        listing
            .files
            .into_iter()
            .map(|(path, origin)| Pending {
                path,
                origin,
                depth: 0,
            })
            .collect()
    };

    let mut plan = Plan {
        files: Vec::new(),
        skipped: Vec::new(),
        failures,
        scope: ExpansionScope::new(options.archive_limits),
    };

    while let Some(item) = queue.pop_front() {
        match FileFormat::from_path(&item.path) {
            FileFormat::Archive => {
                let expanded = plan.scope.expand(&item.path, item.depth + 1).and_then(|dir| {
                    match dir {
                        Some(dir) => {
                            let prefix = format!("{}/", item.origin);
                            list_tree(&dir, &prefix, false, None)
                                .map(Some)
                                .map_err(|e| ExtractError::Archive(e.to_string()))
                        }
                        None => Ok(None),
                    }
                });
                match expanded {
                    Ok(Some(listing)) => {
                        plan.failures.extend(listing.failures);
                        // Splice members in place of the archive, keeping their order.
                        for (path, origin) in listing.files.into_iter().rev() {
                            queue.push_front(Pending {
                                path,
                                origin,
                                depth: item.depth + 1,
                            });
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        tracing::warn!("skipping archive {}: {}", item.origin, error);
                        plan.failures.push(ExtractionFailure {
                            path: PathBuf::from(&item.origin),
                            error,
                        });
                    }
                }
            }
            FileFormat::Unsupported(ext) => {
                tracing::debug!("no extractor for {} (.{})", item.origin, ext);
                plan.skipped.push(item.origin);
            }
            _ => plan.files.push(SourceFile::new(item.path, item.origin)),
        }
    }

    Ok(plan)
}

#[derive(Default)]
struct Listing {
    /// Regular files paired with their origin.
    files: Vec<(PathBuf, String)>,
    /// Entries the walk could not read (dangling links, unreadable dirs).
    failures: Vec<ExtractionFailure>,
}

/// Regular files under `dir`, sorted by path, paired with their origin
/// (`prefix` + path relative to `dir`). Only an unreadable `dir` is fatal.
fn list_tree(
    dir: &Path,
    prefix: &str,
    follow_symlinks: bool,
    filters: Option<(&GlobSet, &GlobSet)>,
) -> Result<Listing> {
    let mut listing = Listing::default();
    let walker = WalkDir::new(dir)
        .follow_links(follow_symlinks)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => return Err(std::io::Error::from(err).into()),
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                let rel_str = relative_origin(dir, &path);
                if let Some((_, exclude)) = filters {
                    if exclude.is_match(&rel_str) {
                        continue;
                    }
                }
                let origin = format!("{}{}", prefix, rel_str);
                tracing::warn!("skipping {}: {}", origin, err);
                listing.failures.push(ExtractionFailure {
                    path: PathBuf::from(origin),
                    error: ExtractError::Io(std::io::Error::from(err)),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel_str = relative_origin(dir, path);

        if let Some((include, exclude)) = filters {
            if exclude.is_match(&rel_str) || !include.is_match(&rel_str) {
                continue;
            }
        }

        listing
            .files
            .push((path.to_path_buf(), format!("{}{}", prefix, rel_str)));
    }
    Ok(listing)
}

fn relative_origin(dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(dir).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| Error::config(e.to_string()))?);
    }
    builder.build().map_err(|e| Error::config(e.to_string()))
}

/// Ingest the corpus and chunk it, logging per-file failures.
pub async fn load_corpus_chunks(
    config: &Config,
    docs: &Path,
    progress: &dyn ProgressReporter,
) -> Result<(IngestReport, Vec<Chunk>)> {
    let options = IngestOptions::from_config(&config.ingest);
    let registry = Arc::new(ExtractorRegistry::with_defaults());
    let report = ingest_corpus(docs, &options, registry, progress).await?;
    let chunks = chunk_corpus(&report.documents, &config.chunking.settings());
    Ok((report, chunks))
}

/// `docchat ingest`: extract, chunk, and build (or reuse) the index.
pub async fn run_ingest(
    config: &Config,
    docs: &Path,
    rebuild: bool,
    dry_run: bool,
    embedder: Arc<dyn EmbeddingProvider>,
    progress: &dyn ProgressReporter,
) -> anyhow::Result<()> {
    if !docs.exists() {
        return Err(Error::CorpusNotFound(docs.to_path_buf()).into());
    }
    let store = VectorStore::new(&config.index.dir);
    let store_id = &config.index.store_id;

    if !dry_run && !rebuild && store.exists(store_id) {
        let retriever = retriever::open_existing(&store, store_id, embedder).await?;
        println!("ingest {}", docs.display());
        println!(
            "  reusing index '{}' ({} chunks, {})",
            store_id,
            retriever.index().len(),
            retriever.index().space()
        );
        println!("  pass --rebuild to re-ingest");
        println!("ok");
        return Ok(());
    }

    let (report, chunks) = load_corpus_chunks(config, docs, progress).await?;

    if dry_run {
        println!("ingest {} (dry-run)", docs.display());
    } else {
        println!("ingest {}", docs.display());
    }
    println!("  files: {}", report.files_seen);
    println!("  documents: {}", report.documents.len());
    println!("  skipped (unsupported): {}", report.skipped.len());
    println!("  failures: {}", report.failures.len());
    for failure in report.failures {
        println!("    - {}", Error::from(failure));
    }
    println!("  chunks: {}", chunks.len());

    if dry_run {
        return Ok(());
    }

    let options = BuildOptions::from_config(&config.embedding);
    let retriever =
        retriever::rebuild(&store, store_id, embedder, &options, progress, chunks).await?;
    println!(
        "  index: '{}' ({} chunks, {})",
        store_id,
        retriever.index().len(),
        retriever.index().space()
    );
    println!("ok");
    Ok(())
}
