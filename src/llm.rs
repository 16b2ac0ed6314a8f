//! Language model access.
//!
//! [`LanguageModel`] is the seam between the conversational engine and a
//! text-generation backend. [`OllamaModel`] talks to `POST {url}/api/generate`:
//! non-streaming calls are retried with backoff, streaming calls parse the
//! NDJSON body line by line, buffering partial lines across network chunks.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::http;

/// Finite stream of answer increments.
pub type TextStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Full completion for `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Completion delivered as increments. Not restartable.
    async fn complete_stream(&self, prompt: &str) -> Result<TextStream>;
}

pub struct OllamaModel {
    model: String,
    url: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            url: format!("{}/api/generate", http::ollama_base_url(config.url.as_deref())),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }

    fn request(&self, prompt: &str, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": stream,
            "options": { "temperature": self.temperature },
        })
    }
}

/// One line of an `/api/generate` response.
#[derive(Debug, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

fn parse_line(line: &[u8]) -> Result<GenerateLine> {
    let parsed: GenerateLine = serde_json::from_slice(line)
        .map_err(|e| Error::llm(format!("invalid /api/generate line: {}", e)))?;
    if let Some(err) = parsed.error {
        return Err(Error::llm(err));
    }
    Ok(parsed)
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = self.request(prompt, false);
        let response = http::post_json_with_retry(&self.client, &self.url, &body, self.max_retries)
            .await
            .map_err(Error::llm)?;
        let bytes = response.bytes().await?;
        Ok(parse_line(&bytes)?.response)
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream> {
        let body = self.request(prompt, true);
        let response = http::post_json_with_retry(&self.client, &self.url, &body, self.max_retries)
            .await
            .map_err(Error::llm)?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(Error::from))
            .boxed();
        Ok(ndjson_increments(bytes))
    }
}

struct LineState {
    body: BoxStream<'static, Result<Vec<u8>>>,
    buf: Vec<u8>,
    finished: bool,
}

/// Turn a byte stream of NDJSON generate lines into answer increments.
///
/// Ends after a line with `"done": true`, or at end of body once any
/// trailing unterminated line has been consumed.
fn ndjson_increments(body: BoxStream<'static, Result<Vec<u8>>>) -> TextStream {
    let state = LineState {
        body,
        buf: Vec::new(),
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }
            if let Some(pos) = state.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = state.buf.drain(..=pos).collect();
                let line = trim_line(&line);
                if line.is_empty() {
                    continue;
                }
                match parse_line(line) {
                    Ok(parsed) => {
                        if parsed.done {
                            state.finished = true;
                        }
                        if parsed.response.is_empty() {
                            continue;
                        }
                        return Some((Ok(parsed.response), state));
                    }
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }
            match state.body.next().await {
                Some(Ok(bytes)) => state.buf.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    if trim_line(&state.buf).is_empty() {
                        return None;
                    }
                    // Unterminated final line.
                    state.buf.push(b'\n');
                }
            }
        }
    })
    .boxed()
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && line[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    let mut start = 0;
    while start < end && line[start].is_ascii_whitespace() {
        start += 1;
    }
    &line[start..end]
}

pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        other => Err(Error::config(format!(
            "Unknown llm provider: '{}'. Must be ollama.",
            other
        ))),
    }
}
