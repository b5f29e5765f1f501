//! Port definition for retrieving encoded image bytes.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::domain::entities::Locator;
use crate::domain::errors::FetchError;

/// Open response body, yielded chunk by chunk.
pub struct ByteStream {
    /// Expected total length, if the source announced one.
    pub total: Option<u64>,
    /// Body chunks in order.
    pub chunks: BoxStream<'static, Result<Bytes, FetchError>>,
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// Port for the byte-fetching collaborator (HTTP client, filesystem, ...).
#[async_trait]
pub trait ImageFetcherPort: Send + Sync {
    /// Opens the locator and returns its body as a stream.
    ///
    /// Transient failures must be reported as retryable `Network` errors.
    async fn open(&self, locator: &Locator) -> Result<ByteStream, FetchError>;
}
