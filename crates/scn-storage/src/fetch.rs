//! Polite single-request page fetching.
//!
//! One request per call, no retries: only robots and sitemap fetches are
//! retried, and the crawler owns that loop, so the fetcher exposes the
//! backoff policy and retryability classification instead of applying them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, StatusCode};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub user_agent: String,
    /// Minimum interval between requests to the same host, enforced by a
    /// shared reservation rather than a per-task timer.
    pub per_host_delay: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: "scn-crawler/0.1 (+https://example.com)".to_string(),
            per_host_delay: Duration::from_millis(500),
        }
    }
}

/// One fetched page with the headers change detection cares about.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: String,
    pub final_url: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request(err) => {
                err.is_timeout() || err.is_connect() || err.is_request()
            }
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(|s| classify_status(s) == RetryDisposition::Retryable)
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Single-page fetch seam. The crawler and pipeline depend on this trait so
/// tests can substitute canned responses.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    per_host_delay: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            per_host_delay: config.per_host_delay,
            next_slot: Mutex::new(HashMap::new()),
        })
    }

    /// Reserve the next request slot for `host` and wait until it arrives.
    /// The slot is claimed while the map lock is held, so concurrent fetches
    /// to one host queue up instead of firing together.
    async fn wait_for_slot(&self, host: &str) {
        let wait = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots
                .get(host)
                .map(|at| *at + self.per_host_delay)
                .filter(|at| *at > now)
                .unwrap_or(now);
            slots.insert(host.to_string(), slot);
            slot.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            debug!(host, wait_ms = wait.as_millis() as u64, "politeness delay");
            tokio::time::sleep(wait).await;
        }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let host = url.host_str().unwrap_or_default().to_string();
        self.wait_for_slot(&host).await;

        let resp = self.client.get(url.clone()).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if !status.is_success() && !status.is_redirection() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let header_string = |name: header::HeaderName| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let etag = header_string(header::ETAG);
        let last_modified = header_string(header::LAST_MODIFIED);

        let body = resp.text().await?;
        Ok(FetchedPage {
            status: status.as_u16(),
            etag,
            last_modified,
            body,
            final_url,
            fetched_at: Utc::now(),
        })
    }
}
