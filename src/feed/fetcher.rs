use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use super::parser::{parse_feed, FeedItem, ParseResult};

const MAX_RETRIES: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Errors that can occur while retrieving and decoding one feed.
///
/// Workers log these per feed; they never abort a fetch cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Source of feed items. Implemented over HTTP by [`HttpFetcher`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve `url` and return its items in document order.
    async fn fetch_and_parse(&self, url: &str) -> Result<Vec<FeedItem>, FetchError>;
}

/// HTTP fetcher with timeout, body size limit and retry on transient failures.
///
/// Rate limiting (429), server errors (5xx) and truncated bodies are retried
/// up to 3 times with exponential backoff starting at `backoff`. Other 4xx
/// statuses fail immediately.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    backoff: Duration,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Build a fetcher with a client identifying as rsshub.
    pub fn with_default_client() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rsshub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::new(client))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut retry_count = 0;

        loop {
            // One deadline covers the headers and the whole body of an attempt
            let deadline = tokio::time::Instant::now() + self.timeout;
            let response = tokio::time::timeout_at(deadline, self.client.get(url).send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;
            let status = response.status();

            let retryable = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::RateLimited(MAX_RETRIES));
                }
                true
            } else if status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }
                true
            } else if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            } else {
                let body =
                    tokio::time::timeout_at(deadline, read_limited_bytes(response, MAX_FEED_SIZE))
                        .await
                        .map_err(|_| FetchError::Timeout)?;
                match body {
                    Ok(bytes) => return Ok(bytes),
                    Err(FetchError::IncompleteResponse { expected, received })
                        if retry_count < MAX_RETRIES =>
                    {
                        tracing::debug!(
                            url = %url,
                            expected = expected,
                            received = received,
                            "Incomplete download"
                        );
                        true
                    }
                    Err(e) => return Err(e),
                }
            };

            if retryable {
                let delay = self.backoff * 2u32.pow(retry_count);
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Transient fetch failure, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_and_parse(&self, url: &str) -> Result<Vec<FeedItem>, FetchError> {
        let bytes = self.download(url).await?;

        let ParseResult { items, skipped } =
            parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;
        if skipped > 0 {
            tracing::warn!(url = %url, skipped = skipped, "Entries without a link skipped");
        }

        tracing::debug!(url = %url, items = items.len(), "Parsed feed");
        Ok(items)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
