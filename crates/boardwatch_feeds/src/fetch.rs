//! Upstream HTTP fetching with the shared retry policy.
//!
//! Transient failures (timeouts, connection errors, HTTP 408/425/429/5xx)
//! are retried with exponential backoff plus jitter; everything else
//! surfaces to the feed caller immediately.

use crate::error::FeedError;
use async_trait::async_trait;
use boardwatch_protocol::defaults::{
    FETCH_BACKOFF_BASE_MS, FETCH_BACKOFF_JITTER_MS, FETCH_MAX_RETRIES, FETCH_TIMEOUT_SECS,
};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("boardwatch/", env!("CARGO_PKG_VERSION"));

/// The seam the worker fetches feeds through. Tests substitute scripted
/// implementations; production uses [`HttpFeedClient`].
#[async_trait]
pub trait FeedFetch: Send + Sync {
    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, FeedError>;
}

/// Retry knobs: `base * 2^attempt + random(0..jitter)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: FETCH_MAX_RETRIES,
            backoff_base: Duration::from_millis(FETCH_BACKOFF_BASE_MS),
            jitter: Duration::from_millis(FETCH_BACKOFF_JITTER_MS),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let backoff = self.backoff_base * 2u32.saturating_pow(attempt);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        backoff + Duration::from_millis(jitter_ms)
    }
}

/// Production feed client over reqwest.
pub struct HttpFeedClient {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpFeedClient {
    pub fn new() -> Result<Self, FeedError> {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(retry: RetryPolicy) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FeedError::Request {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client, retry })
    }

    async fn fetch_once(&self, url: &str) -> Result<serde_json::Value, FeedError> {
        let response = self
            .client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| classify_reqwest_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|e| FeedError::Parse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

fn classify_reqwest_error(url: &str, e: reqwest::Error) -> FeedError {
    if e.is_timeout() {
        FeedError::Timeout {
            url: url.to_string(),
        }
    } else if e.is_connect() {
        FeedError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else {
        FeedError::Request {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl FeedFetch for HttpFeedClient {
    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, FeedError> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_once(url).await {
                Ok(payload) => return Ok(payload),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transient fetch failure, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(url, "fetch failed: {e}");
                    return Err(e);
                }
            }
        }
    }
}
