//! Two-tier image cache: decoded images in memory, encoded bytes on disk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::CacheResult;
use crate::domain::ports::ImageCachePort;

use super::disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskImageCache, default_cache_dir};
use super::memory_cache::{CacheStats, MemoryCacheConfig, MemoryImageCache};

/// Configuration for [`ImageCache::open`].
#[derive(Debug, Clone)]
pub struct ImageCacheConfig {
    /// Memory tier bounds.
    pub memory: MemoryCacheConfig,
    /// Disk tier directory. `None` uses the platform cache directory.
    pub disk_dir: Option<PathBuf>,
    /// Disk tier size limit in bytes.
    pub disk_size_limit: u64,
    /// Disk entries untouched for longer are removed by
    /// [`ImageCache::clean_expired_disk_cache`].
    pub disk_expiration: Option<Duration>,
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            memory: MemoryCacheConfig::default(),
            disk_dir: None,
            disk_size_limit: DEFAULT_MAX_CACHE_SIZE,
            disk_expiration: Some(Duration::from_secs(7 * 24 * 60 * 60)),
        }
    }
}

/// Disk tier summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskStats {
    /// Number of stored files.
    pub files: usize,
    /// Summed size in bytes.
    pub size: u64,
}

impl std::fmt::Display for DiskStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Disk: {} files, {} bytes", self.files, self.size)
    }
}

/// Shared by every coordinator of the process.
pub struct ImageCache {
    memory: MemoryImageCache,
    disk: Option<Arc<DiskImageCache>>,
    disk_expiration: Option<Duration>,
    writes: TaskTracker,
    flushing: Mutex<()>,
}

impl ImageCache {
    /// Combines existing tiers. Without a disk tier the cache is memory-only.
    #[must_use]
    pub fn new(memory: MemoryImageCache, disk: Option<DiskImageCache>) -> Self {
        Self {
            memory,
            disk: disk.map(Arc::new),
            disk_expiration: None,
            writes: TaskTracker::new(),
            flushing: Mutex::new(()),
        }
    }

    /// Opens both tiers. A disk tier that cannot be opened is logged and
    /// skipped.
    pub async fn open(config: &ImageCacheConfig) -> Self {
        let dir = config.disk_dir.clone().unwrap_or_else(default_cache_dir);
        let disk = match DiskImageCache::new(dir.clone(), config.disk_size_limit).await {
            Ok(disk) => Some(disk),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Disk cache unavailable, running memory-only");
                None
            }
        };
        let mut cache = Self::new(MemoryImageCache::new(config.memory), disk);
        cache.disk_expiration = config.disk_expiration;
        cache
    }

    /// Memory tier.
    #[must_use]
    pub const fn memory(&self) -> &MemoryImageCache {
        &self.memory
    }

    /// Returns true when a disk tier is present.
    #[must_use]
    pub const fn has_disk(&self) -> bool {
        self.disk.is_some()
    }

    /// Reads stored bytes. Disk errors are logged and reported as a miss.
    pub async fn disk_bytes(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let disk = self.disk.as_ref()?;
        match disk.get_bytes(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Disk cache read failed");
                None
            }
        }
    }

    /// Schedules a tracked disk write. Returns `None` without a disk tier.
    pub fn spawn_disk_write(&self, key: CacheKey, bytes: Vec<u8>) -> Option<JoinHandle<()>> {
        let disk = self.disk.clone()?;
        Some(self.writes.spawn(async move {
            if let Err(e) = disk.put_bytes(&key, bytes).await {
                warn!(key = %key, error = %e, "Failed to cache to disk");
            }
        }))
    }

    /// Removes a disk entry, logging failures.
    pub async fn remove_disk_entry(&self, key: &CacheKey) {
        if let Some(disk) = &self.disk
            && let Err(e) = disk.remove(key).await
        {
            warn!(key = %key, error = %e, "Failed to remove disk cache entry");
        }
    }

    /// Waits for every disk write scheduled so far.
    ///
    /// Flushes run one at a time: the tracker is reopened only after the
    /// wait that closed it finished.
    pub async fn flush(&self) {
        let _flushing = self.flushing.lock().await;
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    /// Drops every decoded image.
    pub fn clear_memory_cache(&self) {
        self.memory.clear();
        info!("Memory cache cleared");
    }

    /// Deletes every stored file, after pending writes landed.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be read.
    pub async fn clear_disk_cache(&self) -> CacheResult<()> {
        self.flush().await;
        if let Some(disk) = &self.disk {
            disk.clear().await?;
            info!("Disk cache cleared");
        }
        Ok(())
    }

    /// Removes `key` from both tiers.
    ///
    /// # Errors
    /// Returns error if the disk entry exists but cannot be removed.
    pub async fn remove_image(&self, key: &CacheKey) -> CacheResult<()> {
        self.memory.remove(key);
        self.flush().await;
        if let Some(disk) = &self.disk {
            disk.remove(key).await?;
        }
        debug!(key = %key, "Removed image from caches");
        Ok(())
    }

    /// Deletes expired disk entries and drops expired memory entries.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be read.
    pub async fn clean_expired_disk_cache(&self) -> CacheResult<usize> {
        self.memory.remove_expired();
        match (&self.disk, self.disk_expiration) {
            (Some(disk), Some(max_age)) => disk.remove_expired(max_age).await,
            _ => Ok(0),
        }
    }

    /// Memory tier statistics.
    #[must_use]
    pub fn memory_stats(&self) -> CacheStats {
        self.memory.stats()
    }

    /// Disk tier statistics, if present.
    pub async fn disk_stats(&self) -> Option<DiskStats> {
        let disk = self.disk.as_ref()?;
        Some(DiskStats {
            files: disk.len().await,
            size: disk.current_size().await,
        })
    }

    /// Waits for pending writes before the process exits.
    pub async fn shutdown(&self) {
        self.flush().await;
        debug!("Image cache shut down");
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("has_disk", &self.has_disk())
            .field("pending_writes", &self.writes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{DecodedImage, TransformPipeline};
    use crate::test_support::test_cache;

    fn key(name: &str) -> CacheKey {
        CacheKey::derive(name, &TransformPipeline::new())
    }

    fn image() -> Arc<DecodedImage> {
        Arc::new(DecodedImage::still(image::DynamicImage::new_rgba8(4, 4)))
    }

    #[tokio::test]
    async fn test_flush_waits_for_writes() {
        let (cache, _dir) = test_cache(MemoryCacheConfig::default()).await;
        cache.spawn_disk_write(key("a"), b"bytes".to_vec());
        cache.flush().await;
        assert_eq!(cache.disk_bytes(&key("a")).await.as_deref(), Some(&b"bytes"[..]));
    }

    #[tokio::test]
    async fn test_clear_tiers_independently() {
        let (cache, _dir) = test_cache(MemoryCacheConfig::default()).await;
        cache.memory().put(key("a"), image());
        cache.spawn_disk_write(key("a"), b"bytes".to_vec());
        cache.flush().await;

        cache.clear_memory_cache();
        assert!(cache.memory().is_empty());
        assert!(cache.disk_bytes(&key("a")).await.is_some());

        cache.clear_disk_cache().await.unwrap();
        assert!(cache.disk_bytes(&key("a")).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_image_hits_both_tiers() {
        let (cache, _dir) = test_cache(MemoryCacheConfig::default()).await;
        cache.memory().put(key("a"), image());
        cache.spawn_disk_write(key("a"), b"bytes".to_vec());

        cache.remove_image(&key("a")).await.unwrap();
        assert!(cache.memory().peek(&key("a")).is_none());
        assert!(cache.disk_bytes(&key("a")).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_flushes_all_return() {
        let (cache, _dir) = test_cache(MemoryCacheConfig::default()).await;
        let mut tasks = Vec::new();
        for i in 0..32 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                let key = key(&format!("img-{}", i % 4));
                cache.spawn_disk_write(key.clone(), vec![u8::try_from(i).unwrap(); 16]);
                if i % 3 == 0 {
                    cache.clear_disk_cache().await.unwrap();
                } else {
                    cache.remove_image(&key).await.unwrap();
                }
            }));
        }

        let joined = tokio::time::timeout(Duration::from_secs(10), async {
            for task in tasks {
                task.await.unwrap();
            }
            cache.shutdown().await;
        })
        .await;
        assert!(joined.is_ok(), "a flush never returned");
        assert_eq!(cache.disk_stats().await.map(|d| d.files), Some(0));
    }

    #[tokio::test]
    async fn test_unwritable_disk_degrades_to_memory_only() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = ImageCacheConfig {
            disk_dir: Some(file.path().join("images")),
            ..ImageCacheConfig::default()
        };
        let cache = ImageCache::open(&config).await;
        assert!(!cache.has_disk());
        assert!(cache.spawn_disk_write(key("a"), Vec::new()).is_none());
        assert!(cache.disk_stats().await.is_none());
    }
}
