//! HTTP transport adapter over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;

use crate::domain::entities::ResourceUrl;
use crate::domain::errors::{ResourceError, ResourceResult};
use crate::domain::ports::{ByteFetcher, ProgressSink};

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Streams image bytes over HTTP, reporting progress from `Content-Length`.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with the given request timeout.
    ///
    /// # Errors
    /// Returns a network error when the client cannot be built.
    pub fn new(timeout: Duration) -> ResourceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResourceError::network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Creates a fetcher with the default timeout.
    ///
    /// # Errors
    /// Returns a network error when the client cannot be built.
    pub fn with_default_timeout() -> ResourceResult<Self> {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

#[async_trait]
impl ByteFetcher for HttpFetcher {
    async fn fetch(&self, url: &ResourceUrl, progress: &ProgressSink) -> ResourceResult<Bytes> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| ResourceError::network(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResourceError::network(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("unknown")
            )));
        }

        let total = response.content_length();
        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| ResourceError::network(format!("failed to read body: {e}")))?;
            body.extend_from_slice(&chunk);
            if let Some(total) = total
                && total > 0
            {
                #[allow(clippy::cast_precision_loss)]
                progress((body.len() as f64 / total as f64).min(1.0));
            }
        }

        if body.is_empty() {
            return Err(ResourceError::network("empty response body"));
        }
        progress(1.0);
        Ok(body.freeze())
    }
}
