use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tempfile::TempDir;

use docchat::answer::{AnswerEngine, EngineSettings};
use docchat::embedding::HashingEmbedder;
use docchat::error::Error;
use docchat::extract::ExtractorRegistry;
use docchat::ingest::{chunk_corpus, ingest_corpus, IngestOptions};
use docchat::llm::{LanguageModel, TextStream};
use docchat::progress::NoProgress;
use docchat::retriever::{self, build_index, BuildOptions, Retriever};
use docchat::session::SessionStore;
use docchat::vector_store::VectorStore;
use docchat_core::chunk::{ChunkSettings, SizeUnit};
use docchat_core::prompt::NO_CONTEXT;
use docchat_core::{EmbeddingProvider, EmbeddingSpace, RawDocument, VectorIndex};

// ============ Helpers ============

fn write_zip(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, content) in entries {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap();
}

fn registry() -> Arc<ExtractorRegistry> {
    Arc::new(ExtractorRegistry::with_defaults())
}

fn hash_embedder() -> Arc<dyn EmbeddingProvider> {
    Arc::new(HashingEmbedder::new(128))
}

async fn retriever_over(docs: &[RawDocument]) -> Retriever {
    let chunks = chunk_corpus(docs, &ChunkSettings::new(200, 0, SizeUnit::Chars));
    let embedder = hash_embedder();
    let index = build_index(chunks, embedder.as_ref(), &BuildOptions::default(), &NoProgress)
        .await
        .unwrap();
    Retriever::attach(index, embedder).unwrap()
}

/// Model with canned behavior:
/// - rewrite prompts resolve "its" against a France question in the history;
/// - answer prompts without context reply "I don't know.";
/// - otherwise answers stream word by word from `reply`.
struct ScriptedModel {
    reply: String,
    complete_calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            complete_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> docchat::Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let latest = prompt
            .lines()
            .find_map(|l| l.strip_prefix("Latest question: "))
            .unwrap_or("")
            .to_string();
        if prompt.contains("France") && latest.contains("its") {
            return Ok(latest.replace("its", "France's"));
        }
        Ok(latest)
    }

    async fn complete_stream(&self, prompt: &str) -> docchat::Result<TextStream> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let text = if prompt.contains(NO_CONTEXT) {
            "I don't know.".to_string()
        } else {
            self.reply.clone()
        };
        let words: Vec<docchat::Result<String>> = text
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(stream::iter(words).boxed())
    }
}

/// Streams two increments, then never finishes.
struct StallingModel;

#[async_trait]
impl LanguageModel for StallingModel {
    fn model_name(&self) -> &str {
        "stalling"
    }

    async fn complete(&self, prompt: &str) -> docchat::Result<String> {
        Ok(prompt.to_string())
    }

    async fn complete_stream(&self, _prompt: &str) -> docchat::Result<TextStream> {
        let head = stream::iter(vec![Ok("Paris ".to_string()), Ok("is ".to_string())]);
        Ok(head.chain(stream::pending()).boxed())
    }
}

/// Streams one increment, then fails.
struct FailingModel;

#[async_trait]
impl LanguageModel for FailingModel {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, prompt: &str) -> docchat::Result<String> {
        Ok(prompt.to_string())
    }

    async fn complete_stream(&self, _prompt: &str) -> docchat::Result<TextStream> {
        let items = vec![
            Ok("partial ".to_string()),
            Err(Error::llm("connection reset")),
        ];
        Ok(stream::iter(items).boxed())
    }
}

fn engine(retriever: Retriever, llm: Arc<dyn LanguageModel>) -> AnswerEngine {
    AnswerEngine::new(
        Arc::new(retriever),
        llm,
        Arc::new(SessionStore::default()),
        EngineSettings::default(),
    )
}

fn france_docs() -> Vec<RawDocument> {
    vec![
        RawDocument::new(
            "france.txt",
            "Paris is the capital of France. France has a population of about 68 million people.",
        ),
        RawDocument::new("rust.txt", "Cargo builds Rust crates and runs their tests."),
    ]
}

// ============ Ingestion ============

#[tokio::test]
async fn corrupted_file_is_isolated() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
    std::fs::write(tmp.path().join("b.md"), "beta").unwrap();
    std::fs::write(tmp.path().join("broken.json"), "{\"unterminated\": ").unwrap();
    std::fs::write(tmp.path().join("c.csv"), "x,y\n1,2\n").unwrap();

    let report = ingest_corpus(tmp.path(), &IngestOptions::default(), registry(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(report.files_seen, 4);
    assert_eq!(report.documents.len(), 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, Path::new("broken.json"));
}

#[tokio::test]
async fn nested_archives_are_extracted_in_place() {
    let tmp = TempDir::new().unwrap();
    let corpus = tmp.path().join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();

    let inner = tmp.path().join("inner.zip");
    write_zip(&inner, &[("deep.txt", b"deep text".to_vec())]);
    write_zip(
        &corpus.join("bundle.zip"),
        &[
            ("inner.zip", std::fs::read(&inner).unwrap()),
            ("notes/top.md", b"top text".to_vec()),
        ],
    );
    std::fs::write(corpus.join("z.txt"), "last").unwrap();

    let report = ingest_corpus(&corpus, &IngestOptions::default(), registry(), &NoProgress)
        .await
        .unwrap();

    let origins: Vec<&str> = report.documents.iter().map(|d| d.origin.as_str()).collect();
    assert_eq!(
        origins,
        vec!["bundle.zip/inner.zip/deep.txt", "bundle.zip/notes/top.md", "z.txt"]
    );
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn archive_depth_limit_is_a_recorded_failure() {
    let tmp = TempDir::new().unwrap();
    let corpus = tmp.path().join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();

    let inner = tmp.path().join("inner.zip");
    write_zip(&inner, &[("deep.txt", b"deep".to_vec())]);
    write_zip(
        &corpus.join("outer.zip"),
        &[("inner.zip", std::fs::read(&inner).unwrap())],
    );

    let mut options = IngestOptions::default();
    options.archive_limits.max_depth = 1;
    let report = ingest_corpus(&corpus, &options, registry(), &NoProgress)
        .await
        .unwrap();

    assert!(report.documents.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, Path::new("outer.zip/inner.zip"));
}

// ============ Index persistence ============

#[tokio::test]
async fn reloaded_index_answers_identically() {
    let tmp = TempDir::new().unwrap();
    let docs: Vec<RawDocument> = (0..10)
        .map(|i| {
            RawDocument::new(
                format!("doc{}.txt", i),
                format!("document {} talks about topic{} and shared words", i, i),
            )
        })
        .collect();
    let chunks = chunk_corpus(&docs, &ChunkSettings::new(500, 0, SizeUnit::Chars));
    assert_eq!(chunks.len(), 10);

    let embedder = hash_embedder();
    let store = VectorStore::new(tmp.path());
    let built = retriever::rebuild(
        &store,
        "ten",
        embedder.clone(),
        &BuildOptions::default(),
        &NoProgress,
        chunks,
    )
    .await
    .unwrap();

    let first = retriever::open_existing(&store, "ten", embedder.clone())
        .await
        .unwrap();
    let second = retriever::open_existing(&store, "ten", embedder)
        .await
        .unwrap();

    for query in ["topic3 words", "document 7", "shared"] {
        let expected = built.query(query, 3).await.unwrap();
        assert_eq!(first.query(query, 3).await.unwrap(), expected);
        assert_eq!(second.query(query, 3).await.unwrap(), expected);
    }
}

#[tokio::test]
async fn other_embedding_space_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let store = VectorStore::new(tmp.path());
    let chunks = chunk_corpus(&france_docs(), &ChunkSettings::new(200, 0, SizeUnit::Chars));
    retriever::rebuild(
        &store,
        "docs",
        Arc::new(HashingEmbedder::new(64)),
        &BuildOptions::default(),
        &NoProgress,
        chunks,
    )
    .await
    .unwrap();

    let result = retriever::open_existing(&store, "docs", Arc::new(HashingEmbedder::new(32))).await;
    assert!(matches!(result, Err(Error::EmbeddingSpaceMismatch { .. })));
}

// ============ Conversation ============

#[tokio::test]
async fn follow_up_is_rewritten_with_history() {
    let llm = Arc::new(ScriptedModel::new("Paris is the capital of France."));
    let engine = engine(retriever_over(&france_docs()).await, llm.clone());

    let first = engine
        .ask_to_string("s1", "What is the capital of France?")
        .await
        .unwrap();
    assert_eq!(first, "Paris is the capital of France.");
    // No history yet, so the rewriter made no call.
    assert_eq!(llm.complete_calls.load(Ordering::SeqCst), 0);

    engine
        .ask_to_string("s1", "What is its population?")
        .await
        .unwrap();
    assert_eq!(llm.complete_calls.load(Ordering::SeqCst), 1);

    let history = engine.sessions().history("s1").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].standalone_query, "What is the capital of France?");
    assert!(history[1].standalone_query.contains("France"));
    assert_eq!(history[1].utterance, "What is its population?");
    assert!(history.iter().all(|t| t.completed));
    assert_eq!(history[1].retrieved[0].origin, "france.txt");
}

#[tokio::test]
async fn answer_prompt_carries_retrieved_context() {
    let llm = Arc::new(ScriptedModel::new("ok"));
    let engine = engine(retriever_over(&france_docs()).await, llm.clone());
    engine.ask_to_string("s", "capital of France").await.unwrap();

    let prompts = llm.prompts.lock().unwrap();
    let answer_prompt = prompts.last().unwrap();
    assert!(answer_prompt.contains("Paris is the capital of France."));
    assert!(answer_prompt.contains("Question: capital of France"));
    assert!(answer_prompt.contains("three sentences maximum"));
}

#[tokio::test]
async fn empty_index_answers_dont_know() {
    let embedder = hash_embedder();
    let index = VectorIndex::new(EmbeddingSpace::new(embedder.model_name(), 128));
    let retriever = Retriever::attach(index, embedder).unwrap();
    let engine = engine(retriever, Arc::new(ScriptedModel::new("unused")));

    let answer = engine.ask_to_string("s", "Anything?").await.unwrap();
    assert!(answer.contains("don't know"));

    let history = engine.sessions().history("s").await;
    assert_eq!(history.len(), 1);
    assert!(history[0].retrieved.is_empty());
    assert!(history[0].completed);
}

#[tokio::test]
async fn cancellation_commits_partial_answer() {
    let engine = engine(retriever_over(&france_docs()).await, Arc::new(StallingModel));

    let mut stream = engine.ask("s", "capital?").await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "Paris ");
    assert_eq!(stream.next().await.unwrap().unwrap(), "is ");
    let turn = stream.cancel().unwrap();
    assert_eq!(turn.answer, "Paris is ");
    assert!(!turn.completed);

    let history = engine.sessions().history("s").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].answer, "Paris is ");
    assert!(!history[0].completed);
}

#[tokio::test]
async fn dropping_the_stream_commits_partial_answer() {
    let engine = engine(retriever_over(&france_docs()).await, Arc::new(StallingModel));

    let mut stream = engine.ask("s", "capital?").await.unwrap();
    stream.next().await.unwrap().unwrap();
    drop(stream);

    let history = engine.sessions().history("s").await;
    assert_eq!(history[0].answer, "Paris ");
    assert!(!history[0].completed);
}

#[tokio::test]
async fn generation_error_commits_then_surfaces() {
    let engine = engine(retriever_over(&france_docs()).await, Arc::new(FailingModel));

    let err = engine.ask_to_string("s", "capital?").await.unwrap_err();
    assert!(matches!(err, Error::Llm(_)));

    let history = engine.sessions().history("s").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].answer, "partial ");
    assert!(!history[0].completed);
}

#[tokio::test]
async fn one_session_answers_one_question_at_a_time() {
    let engine = engine(retriever_over(&france_docs()).await, Arc::new(StallingModel));

    let open = engine.ask("busy", "first").await.unwrap();
    let blocked = tokio::time::timeout(Duration::from_millis(100), engine.ask("busy", "second")).await;
    assert!(blocked.is_err());

    // Other sessions are unaffected.
    let other = tokio::time::timeout(Duration::from_millis(500), engine.ask("idle", "hello")).await;
    assert!(other.is_ok());

    drop(open);
    let next = tokio::time::timeout(Duration::from_millis(500), engine.ask("busy", "second")).await;
    assert!(next.is_ok());
}

#[tokio::test]
async fn concurrent_sessions_keep_separate_histories() {
    let engine = Arc::new(engine(
        retriever_over(&france_docs()).await,
        Arc::new(ScriptedModel::new("answer")),
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("session-{}", i);
            engine.ask_to_string(&id, "capital of France").await.unwrap();
            engine.ask_to_string(&id, "and cargo?").await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let ids = engine.sessions().session_ids();
    assert_eq!(ids.len(), 8);
    for id in ids {
        let history = engine.sessions().history(&id).await;
        let utterances: Vec<&str> = history.iter().map(|t| t.utterance.as_str()).collect();
        assert_eq!(utterances, vec!["capital of France", "and cargo?"]);
    }
}
