//! Shared HTTP plumbing: client construction, error mapping and retries

use coinflow_core::logging::{self, LogLevel};
use coinflow_core::ChainClientError;
use log::warn;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

/// First pause between retries
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Growth factor of the pause after every failed attempt
pub const BACKOFF_FACTOR: f64 = 1.6;

/// Exponential delay schedule
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    factor: f64,
    remaining: u32,
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64, max_retries: u32) -> Self {
        Self {
            next: initial,
            factor,
            remaining: max_retries,
        }
    }

    /// Delay before the next retry, or None once retries are used up
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.next;
        self.next = self.next.mul_f64(self.factor);
        Some(delay)
    }
}

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, ChainClientError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ChainClientError::Connection(format!("failed to build HTTP client: {}", e)))
}

pub(crate) fn map_reqwest_error(e: reqwest::Error) -> ChainClientError {
    if e.is_timeout() {
        ChainClientError::Timeout(e.to_string())
    } else if e.is_decode() {
        ChainClientError::Parse(e.to_string())
    } else {
        ChainClientError::Connection(e.to_string())
    }
}

async fn get_once(client: &reqwest::Client, url: &str) -> Result<String, ChainClientError> {
    let response = client.get(url).send().await.map_err(map_reqwest_error)?;
    let status = response.status();
    let body = response.text().await.map_err(map_reqwest_error)?;

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ChainClientError::NotFound(url.to_string()));
    }
    if !status.is_success() {
        return Err(ChainClientError::Http {
            status: status.as_u16(),
            message: body,
        });
    }
    Ok(body)
}

/// GET a URL as text, retrying transient failures with exponential backoff
pub(crate) async fn get_text(
    client: &reqwest::Client,
    url: &str,
    max_retries: u32,
) -> Result<String, ChainClientError> {
    let mut backoff = Backoff::new(INITIAL_BACKOFF, BACKOFF_FACTOR, max_retries);
    loop {
        match get_once(client, url).await {
            Ok(body) => return Ok(body),
            Err(e) if e.is_transient() => match backoff.next_delay() {
                Some(delay) => {
                    warn!("GET {} failed: {}, will try again in {:?}", url, e, delay);
                    tokio::time::sleep(delay).await;
                }
                None => {
                    logging::log_network(
                        LogLevel::Error,
                        "giving up after retries",
                        Some(json!({ "url": url, "retries": max_retries, "error": e.to_string() })),
                    );
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}

/// GET a URL and decode the JSON body
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    max_retries: u32,
) -> Result<T, ChainClientError> {
    let body = get_text(client, url, max_retries).await?;
    serde_json::from_str(&body).map_err(|e| ChainClientError::Parse(format!("{}: {}", url, e)))
}
