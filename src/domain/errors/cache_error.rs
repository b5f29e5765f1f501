//! Cache adapter error types.

use thiserror::Error;

use super::FetchError;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur inside a cache adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// I/O error while reading or writing the cache.
    #[error("IO error: {0}")]
    Io(String),
    /// Failed to encode an image for storage.
    #[error("Encode error: {0}")]
    Encode(String),
    /// Stored bytes could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<CacheError> for FetchError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Decode(message) => Self::Decode { message },
            other => Self::CacheIo {
                message: other.to_string(),
            },
        }
    }
}
