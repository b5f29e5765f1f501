//! Domain error types.

mod cache_error;
mod fetch_error;

pub use cache_error::{CacheError, CacheResult};
pub use fetch_error::{ErrorCategory, FetchError};
