//! Port definition for decoded-image caching.

use std::sync::Arc;

use crate::domain::entities::{CacheKey, DecodedImage};

/// Port for in-process caching of decoded artifacts.
/// Implementations must be thread-safe and must not block on I/O, since
/// lookups happen on the caller's thread.
pub trait ImageCachePort: Send + Sync {
    /// Attempts to get an image from the cache, refreshing its recency.
    /// Returns None if not cached.
    fn get(&self, key: &CacheKey) -> Option<Arc<DecodedImage>>;

    /// Stores an image. Returns false if the cache refused it because it
    /// cannot fit within the configured bounds.
    fn put(&self, key: CacheKey, image: Arc<DecodedImage>) -> bool;

    /// Removes an image from the cache.
    fn remove(&self, key: &CacheKey) -> Option<Arc<DecodedImage>>;

    /// Returns the current number of cached images.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all images from the cache.
    fn clear(&self);
}
