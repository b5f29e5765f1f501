//! Fetch error types.

use thiserror::Error;

/// Coarse grouping of [`FetchError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The request itself was malformed.
    Request,
    /// Retrieving bytes failed.
    Network,
    /// Bytes were retrieved but could not be turned into an image.
    Decode,
    /// The request was cancelled.
    Cancelled,
    /// The cache could not serve or store the image.
    Cache,
}

/// Terminal failure delivered to every waiter of a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum FetchError {
    #[error("invalid locator {locator:?}: {reason}")]
    LocatorInvalid { locator: String, reason: String },

    #[error("invalid transform pipeline: {reason}")]
    InvalidPipeline { reason: String },

    #[error("network error: {message}")]
    Network { message: String, retryable: bool },

    #[error("decode error: {message}")]
    Decode { message: String },

    #[error("fetch cancelled")]
    Cancelled,

    #[error("image not cached: {key}")]
    NotCached { key: String },

    #[error("cache io error: {message}")]
    CacheIo { message: String },
}

impl FetchError {
    /// Creates an invalid locator error.
    #[must_use]
    pub fn locator_invalid(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LocatorInvalid {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid pipeline error.
    #[must_use]
    pub fn invalid_pipeline(reason: impl Into<String>) -> Self {
        Self::InvalidPipeline {
            reason: reason.into(),
        }
    }

    /// Creates a network error that may succeed when retried.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a network error that will not succeed when retried.
    #[must_use]
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a cache I/O error.
    #[must_use]
    pub fn cache_io(message: impl Into<String>) -> Self {
        Self::CacheIo {
            message: message.into(),
        }
    }

    /// Returns whether the coordinator may retry the operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network {
                retryable: true,
                ..
            }
        )
    }

    /// Returns whether this is the cancellation terminal state.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the coarse category of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::LocatorInvalid { .. } | Self::InvalidPipeline { .. } => ErrorCategory::Request,
            Self::Network { .. } => ErrorCategory::Network,
            Self::Decode { .. } => ErrorCategory::Decode,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::NotCached { .. } | Self::CacheIo { .. } => ErrorCategory::Cache,
        }
    }
}
