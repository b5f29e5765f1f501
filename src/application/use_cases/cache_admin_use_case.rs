//! Cache maintenance use case.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::application::services::CallbackQueue;
use crate::domain::entities::CacheKey;
use crate::domain::errors::CacheResult;
use crate::infrastructure::image::{CacheStats, DiskStats, ImageCache};

/// Snapshot of both cache tiers.
#[derive(Debug, Clone)]
pub struct CacheReport {
    /// Memory tier counters.
    pub memory: CacheStats,
    /// Disk tier summary, if a disk tier is present.
    pub disk: Option<DiskStats>,
}

impl std::fmt::Display for CacheReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.memory)?;
        match &self.disk {
            Some(disk) => write!(f, "{disk}"),
            None => write!(f, "Disk: disabled"),
        }
    }
}

/// Clears, cleans and inspects the shared cache.
#[derive(Clone, Debug)]
pub struct CacheAdminUseCase {
    cache: Arc<ImageCache>,
    runtime: Handle,
}

impl CacheAdminUseCase {
    /// Creates the use case. Callback-style operations run on `runtime`.
    #[must_use]
    pub const fn new(cache: Arc<ImageCache>, runtime: Handle) -> Self {
        Self { cache, runtime }
    }

    /// Drops every decoded image.
    pub fn clear_memory_cache(&self) {
        self.cache.clear_memory_cache();
    }

    /// Deletes every stored file.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be read.
    pub async fn clear_disk_cache(&self) -> CacheResult<()> {
        self.cache.clear_disk_cache().await
    }

    /// Clears both tiers.
    ///
    /// # Errors
    /// Returns error if the disk tier cannot be cleared. Memory is cleared
    /// regardless.
    pub async fn clean_cache(&self) -> CacheResult<()> {
        self.cache.clear_memory_cache();
        self.cache.clear_disk_cache().await.inspect_err(|e| {
            warn!(error = %e, "Failed to clear disk cache");
        })
    }

    /// Deletes disk entries older than the configured expiration.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be read.
    pub async fn clean_expired_disk_cache(&self) -> CacheResult<usize> {
        let removed = self.cache.clean_expired_disk_cache().await?;
        info!(removed, "Cleaned expired disk cache entries");
        Ok(removed)
    }

    /// Removes one variant of an image from both tiers.
    ///
    /// # Errors
    /// Returns error if the disk entry exists but cannot be removed.
    pub async fn remove(&self, source_key: &str, pipeline_identity: &str) -> CacheResult<()> {
        let key = CacheKey::from_parts(source_key, pipeline_identity);
        self.cache.remove_image(&key).await
    }

    /// Callback form of [`Self::remove`], used before reloading an element
    /// whose transform parameters changed. `completion` runs on `queue`.
    pub fn remove_image(
        &self,
        source_key: &str,
        pipeline_identity: &str,
        queue: CallbackQueue,
        completion: impl FnOnce(CacheResult<()>) + Send + 'static,
    ) {
        let key = CacheKey::from_parts(source_key, pipeline_identity);
        let cache = self.cache.clone();
        self.runtime.spawn(async move {
            let result = cache.remove_image(&key).await;
            queue.execute(move || completion(result));
        });
    }

    /// Current counters of both tiers.
    pub async fn report(&self) -> CacheReport {
        CacheReport {
            memory: self.cache.memory_stats(),
            disk: self.cache.disk_stats().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{DecodedImage, TransformPipeline, TransformStep};
    use crate::domain::ports::ImageCachePort;
    use crate::infrastructure::image::MemoryCacheConfig;
    use crate::test_support::test_cache;
    use tokio::sync::oneshot;

    fn image() -> Arc<DecodedImage> {
        Arc::new(DecodedImage::still(image::DynamicImage::new_rgba8(2, 2)))
    }

    #[tokio::test]
    async fn test_remove_image_targets_one_variant() {
        let (cache, _dir) = test_cache(MemoryCacheConfig::default()).await;
        let admin = CacheAdminUseCase::new(cache.clone(), Handle::current());
        let rounded = TransformPipeline::new().then(TransformStep::round_corner(30.0));
        let plain_key = CacheKey::derive("a.png", &TransformPipeline::new());
        let rounded_key = CacheKey::derive("a.png", &rounded);
        cache.memory().put(plain_key.clone(), image());
        cache.memory().put(rounded_key.clone(), image());
        cache.spawn_disk_write(rounded_key.clone(), b"rounded".to_vec());

        let (tx, rx) = oneshot::channel();
        admin.remove_image(
            "a.png",
            &rounded.identifier(),
            CallbackQueue::Untouched,
            move |result| {
                let _ = tx.send(result);
            },
        );
        rx.await.unwrap().unwrap();

        assert!(cache.memory().contains(&plain_key));
        assert!(!cache.memory().contains(&rounded_key));
        assert!(cache.disk_bytes(&rounded_key).await.is_none());
    }

    #[tokio::test]
    async fn test_clean_cache_empties_both_tiers() {
        let (cache, _dir) = test_cache(MemoryCacheConfig::default()).await;
        let admin = CacheAdminUseCase::new(cache.clone(), Handle::current());
        let key = CacheKey::derive("a.png", &TransformPipeline::new());
        cache.memory().put(key.clone(), image());
        cache.spawn_disk_write(key.clone(), b"bytes".to_vec());

        admin.clean_cache().await.unwrap();

        let report = admin.report().await;
        assert_eq!(report.memory.size, 0);
        assert_eq!(report.disk.map(|d| d.files), Some(0));
    }

    #[tokio::test]
    async fn test_report_display() {
        let (cache, _dir) = test_cache(MemoryCacheConfig::default()).await;
        let admin = CacheAdminUseCase::new(cache, Handle::current());
        let text = admin.report().await.to_string();
        assert!(text.contains("Disk: 0 files"));
    }
}
