//! HTTP and filesystem byte fetcher.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt, stream};
use reqwest::{Client, StatusCode};
use tracing::{debug, trace};

use crate::domain::entities::Locator;
use crate::domain::errors::FetchError;
use crate::domain::ports::{ByteStream, ImageFetcherPort};

/// Default `User-Agent` sent with image requests.
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Configuration for [`HttpImageFetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Fetches `http(s)://` locators with reqwest and `file://` locators from disk.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    /// Creates a fetcher.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: &HttpFetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::terminal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn open_file(locator: &Locator) -> Result<ByteStream, FetchError> {
        let path = locator
            .to_file_path()
            .ok_or_else(|| FetchError::locator_invalid(locator.as_str(), "not a local path"))?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| FetchError::terminal(format!("{}: {e}", path.display())))?;
        trace!(path = %path.display(), size = bytes.len(), "Read local image");
        Ok(ByteStream {
            total: Some(bytes.len() as u64),
            chunks: stream::iter([Ok(Bytes::from(bytes))]).boxed(),
        })
    }
}

#[async_trait]
impl ImageFetcherPort for HttpImageFetcher {
    async fn open(&self, locator: &Locator) -> Result<ByteStream, FetchError> {
        if locator.is_file() {
            return Self::open_file(locator).await;
        }

        debug!(url = %locator, "Downloading image");
        let response = self
            .client
            .get(locator.url().clone())
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let total = response.content_length();
        let chunks = response
            .bytes_stream()
            .map_err(|e| classify_request_error(&e))
            .boxed();
        Ok(ByteStream { total, chunks })
    }
}

/// Maps a non-success HTTP status to a fetch error.
///
/// Server errors, timeouts and rate limiting are worth retrying; other
/// client errors are not.
#[must_use]
pub fn classify_status(status: StatusCode) -> FetchError {
    let message = format!(
        "HTTP {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    );
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        FetchError::transient(message)
    } else {
        FetchError::terminal(message)
    }
}

fn classify_request_error(e: &reqwest::Error) -> FetchError {
    if e.is_builder() || e.is_redirect() {
        FetchError::terminal(format!("Request failed: {e}"))
    } else {
        FetchError::transient(format!("Request failed: {e}"))
    }
}
