//! Conversational answering.
//!
//! One question moves through [`Stage`]s in order:
//!
//! ```text
//! Rewrite → Retrieve → Compose → Generate → Commit
//! ```
//!
//! The session's lock is held from rewrite until commit, so questions in one
//! session are answered one at a time while other sessions proceed. The
//! answer is delivered as an [`AnswerStream`]; the turn is committed when the
//! stream ends, when generation fails, or when the caller cancels or drops
//! the stream. Interrupted turns keep whatever text was produced and are
//! marked `completed = false`.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use tokio::sync::OwnedMutexGuard;

use docchat_core::models::{ScoredChunk, Session, Turn};
use docchat_core::prompt::answer_prompt;

use crate::config::Config;
use crate::error::Result;
use crate::llm::{LanguageModel, TextStream};
use crate::retriever::Retriever;
use crate::rewrite::QueryRewriter;
use crate::session::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Rewrite,
    Retrieve,
    Compose,
    Generate,
    Commit,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Chunks retrieved per question.
    pub k: usize,
    /// Turns of history given to the rewriter.
    pub history_window: usize,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            k: config.retrieval.k,
            history_window: config.chat.history_window,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct AnswerEngine {
    retriever: Arc<Retriever>,
    llm: Arc<dyn LanguageModel>,
    sessions: Arc<SessionStore>,
    rewriter: QueryRewriter,
    settings: EngineSettings,
}

impl AnswerEngine {
    pub fn new(
        retriever: Arc<Retriever>,
        llm: Arc<dyn LanguageModel>,
        sessions: Arc<SessionStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            rewriter: QueryRewriter::new(llm.clone()),
            retriever,
            llm,
            sessions,
            settings,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Start answering `utterance` in session `session_id`.
    ///
    /// Failures before generation starts commit nothing.
    pub async fn ask(&self, session_id: &str, utterance: &str) -> Result<AnswerStream> {
        let handle = self.sessions.get_or_create(session_id);
        let session = handle.lock_owned().await;

        tracing::debug!(session = session_id, stage = ?Stage::Rewrite, "answering");
        let history = session.recent(self.settings.history_window).to_vec();
        let standalone = self.rewriter.rewrite(&history, utterance).await?;

        tracing::debug!(session = session_id, stage = ?Stage::Retrieve, query = %standalone, "answering");
        let retrieved = self.retriever.query(&standalone, self.settings.k).await?;

        tracing::debug!(session = session_id, stage = ?Stage::Compose, chunks = retrieved.len(), "answering");
        let prompt = answer_prompt(&standalone, &retrieved);

        tracing::debug!(session = session_id, stage = ?Stage::Generate, model = self.llm.model_name(), "answering");
        let increments = self.llm.complete_stream(&prompt).await?;

        Ok(AnswerStream {
            increments,
            session: Some(session),
            max_turns: self.sessions.max_turns(),
            utterance: utterance.to_string(),
            standalone_query: standalone,
            retrieved,
            answer: String::new(),
            turn: None,
        })
    }

    /// Ask and wait for the full answer.
    pub async fn ask_to_string(&self, session_id: &str, utterance: &str) -> Result<String> {
        let mut stream = self.ask(session_id, utterance).await?;
        while let Some(delta) = stream.next().await {
            delta?;
        }
        Ok(stream.answer().to_string())
    }
}

/// Answer increments for one question.
///
/// Yields `Ok(delta)` as the model produces text. After the final item (or
/// an `Err`) the turn has been committed to the session.
pub struct AnswerStream {
    increments: TextStream,
    /// Held until commit; `None` afterwards.
    session: Option<OwnedMutexGuard<Session>>,
    max_turns: usize,
    utterance: String,
    standalone_query: String,
    retrieved: Vec<ScoredChunk>,
    answer: String,
    turn: Option<Turn>,
}

impl AnswerStream {
    pub fn standalone_query(&self) -> &str {
        &self.standalone_query
    }

    pub fn retrieved(&self) -> &[ScoredChunk] {
        &self.retrieved
    }

    /// Text received so far.
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// The committed turn, once the stream has ended or failed.
    pub fn turn(&self) -> Option<&Turn> {
        self.turn.as_ref()
    }

    /// Stop generation and commit the partial answer.
    pub fn cancel(mut self) -> Option<Turn> {
        self.commit(false);
        self.turn.take()
    }

    fn commit(&mut self, completed: bool) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let turn = Turn {
            utterance: self.utterance.clone(),
            standalone_query: self.standalone_query.clone(),
            retrieved: self.retrieved.iter().map(|s| s.chunk.reference()).collect(),
            answer: self.answer.clone(),
            completed,
            created_at: Utc::now(),
        };
        tracing::debug!(
            session = %session.id,
            stage = ?Stage::Commit,
            completed,
            chars = self.answer.len(),
            "turn committed"
        );
        session.push_turn(turn.clone(), self.max_turns);
        self.turn = Some(turn);
    }
}

impl Stream for AnswerStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.session.is_none() {
            return Poll::Ready(None);
        }
        match this.increments.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(delta))) => {
                this.answer.push_str(&delta);
                Poll::Ready(Some(Ok(delta)))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!("generation failed after {} chars: {}", this.answer.len(), e);
                this.commit(false);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.commit(true);
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        self.commit(false);
    }
}
