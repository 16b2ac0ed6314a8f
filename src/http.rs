//! JSON POST with retry for the Ollama HTTP API.
//!
//! Retry strategy:
//! - HTTP 429 or 5xx → retry with exponential backoff (1s, 2s, 4s, ... capped at 32s)
//! - other HTTP 4xx → fail immediately
//! - network error → retry

use std::time::Duration;

/// Default Ollama endpoint; `OLLAMA_HOST` overrides it when no URL is configured.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

pub fn ollama_base_url(configured: Option<&str>) -> String {
    let url = match configured {
        Some(url) => url.to_string(),
        None => std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string()),
    };
    let url = if url.starts_with("http://") || url.starts_with("https://") {
        url
    } else {
        format!("http://{}", url)
    };
    url.trim_end_matches('/').to_string()
}

pub fn client(timeout_secs: u64) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

/// POST `body` to `url`, returning the first successful response.
///
/// Errors are rendered as strings so callers can wrap them in the error
/// kind of their own subsystem.
pub async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<reqwest::Response, String> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!("retrying {} in {:?} (attempt {})", url, delay, attempt + 1);
            tokio::time::sleep(delay).await;
        }

        match client.post(url).json(body).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::warn!("{} returned {}: {}", url, status, body_text);
                    last_err = Some(format!("{} returned {}: {}", url, status, body_text));
                    continue;
                }

                return Err(format!("{} returned {}: {}", url, status, body_text));
            }
            Err(e) => {
                tracing::warn!("request to {} failed: {}", url, e);
                last_err = Some(format!("request to {} failed: {}", url, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("request to {} failed after retries", url)))
}
