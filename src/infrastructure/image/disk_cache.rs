//! Disk-based image cache for persistence across sessions.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheError, CacheResult};

/// Maximum disk cache size in bytes (200 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 200 * 1024 * 1024;

const FILE_EXTENSION: &str = "img";

#[derive(Debug, Default)]
struct DiskIndex {
    files: HashMap<String, u64>,
    total: u64,
}

impl DiskIndex {
    fn insert(&mut self, stem: String, size: u64) {
        if let Some(old) = self.files.insert(stem, size) {
            self.total -= old;
        }
        self.total += size;
    }

    fn remove(&mut self, stem: &str) -> Option<u64> {
        let size = self.files.remove(stem)?;
        self.total -= size;
        Some(size)
    }
}

/// Disk-based image cache that persists encoded image bytes.
///
/// Files are named after the SHA-256 of the cache key. Mutations are
/// serialized through the index lock; reads go straight to the filesystem.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_size: u64,
    index: Mutex<DiskIndex>,
}

impl DiskImageCache {
    /// Opens (or creates) a disk cache in the specified directory.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be created or listed.
    pub async fn new(cache_dir: PathBuf, max_size: u64) -> CacheResult<Self> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| CacheError::Io(format!("Failed to create cache dir: {e}")))?;

        let mut index = DiskIndex::default();
        let mut entries = fs::read_dir(&cache_dir)
            .await
            .map_err(|e| CacheError::Io(format!("Failed to read cache dir: {e}")))?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if let Some(stem) = cache_stem(&path)
                && let Ok(meta) = entry.metadata().await
            {
                index.insert(stem, meta.len());
            }
        }

        debug!(
            dir = %cache_dir.display(),
            files = index.files.len(),
            size = index.total,
            "Opened disk cache"
        );

        let cache = Self {
            cache_dir,
            max_size,
            index: Mutex::new(index),
        };
        {
            let mut index = cache.index.lock().await;
            cache.cleanup_if_needed(&mut index).await;
        }
        Ok(cache)
    }

    /// Opens a cache in the default location (`~/.cache/imgfetch/images/`).
    ///
    /// # Errors
    /// Returns error if cache directory cannot be created.
    pub async fn default_location(max_size: u64) -> CacheResult<Self> {
        Self::new(default_cache_dir(), max_size).await
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the configured size limit in bytes.
    #[must_use]
    pub const fn max_size(&self) -> u64 {
        self.max_size
    }

    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.path_for_stem(&key.file_stem())
    }

    fn path_for_stem(&self, stem: &str) -> PathBuf {
        self.cache_dir.join(format!("{stem}.{FILE_EXTENSION}"))
    }

    /// Reads the stored bytes of `key` and refreshes its recency.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read.
    pub async fn get_bytes(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        let path = self.cache_path(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                touch(path).await;
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(key = %key, "Disk cache miss");
                self.index.lock().await.remove(&key.file_stem());
                Ok(None)
            }
            Err(e) => Err(CacheError::Io(format!("Failed to read cache file: {e}"))),
        }
    }

    /// Stores bytes for `key`, replacing any previous entry atomically.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub async fn put_bytes(&self, key: &CacheKey, bytes: Vec<u8>) -> CacheResult<()> {
        let stem = key.file_stem();
        let path = self.path_for_stem(&stem);
        let dir = self.cache_dir.clone();
        let size = bytes.len() as u64;

        let mut index = self.index.lock().await;
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp_file = tempfile::NamedTempFile::new_in(&dir)?;
            temp_file.write_all(&bytes)?;
            temp_file.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::Io(format!("Write task failed: {e}")))?
        .map_err(|e| CacheError::Io(format!("Failed to write cache file: {e}")))?;

        index.insert(stem, size);
        debug!(key = %key, size, "Stored image in disk cache");

        self.cleanup_if_needed(&mut index).await;
        Ok(())
    }

    /// Removes the entry of `key`. Returns true if a file was deleted.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be removed.
    pub async fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        let stem = key.file_stem();
        let mut index = self.index.lock().await;
        match fs::remove_file(self.path_for_stem(&stem)).await {
            Ok(()) => {
                index.remove(&stem);
                debug!(key = %key, "Removed image from disk cache");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                index.remove(&stem);
                Ok(false)
            }
            Err(e) => Err(CacheError::Io(format!("Failed to remove cache file: {e}"))),
        }
    }

    /// Clears the entire disk cache.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be read.
    pub async fn clear(&self) -> CacheResult<()> {
        let mut index = self.index.lock().await;
        let mut entries = fs::read_dir(&self.cache_dir)
            .await
            .map_err(|e| CacheError::Io(format!("Failed to read cache dir: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::Io(format!("Failed to read entry: {e}")))?
        {
            let path = entry.path();
            if let Some(stem) = cache_stem(&path) {
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove cache file");
                } else {
                    index.remove(&stem);
                }
            }
        }
        debug!("Cleared disk cache");
        Ok(())
    }

    /// Deletes entries not touched within `max_age`. Returns how many.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be read.
    pub async fn remove_expired(&self, max_age: Duration) -> CacheResult<usize> {
        let mut index = self.index.lock().await;
        let now = SystemTime::now();
        let mut removed = 0usize;

        for (stem, modified, _) in self.scan_files(&index).await {
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= max_age {
                continue;
            }
            let path = self.path_for_stem(&stem);
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove expired cache file");
            } else {
                index.remove(&stem);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "Removed expired disk cache entries");
        }
        Ok(removed)
    }

    /// Returns true if `key` has a stored entry.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.index.lock().await.files.contains_key(&key.file_stem())
    }

    /// Returns the current cache size in bytes.
    pub async fn current_size(&self) -> u64 {
        self.index.lock().await.total
    }

    /// Returns the number of cached files.
    pub async fn len(&self) -> usize {
        self.index.lock().await.files.len()
    }

    /// Returns true if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn scan_files(&self, index: &DiskIndex) -> Vec<(String, SystemTime, u64)> {
        let mut files = Vec::with_capacity(index.files.len());
        for (stem, size) in &index.files {
            let modified = fs::metadata(self.path_for_stem(stem))
                .await
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((stem.clone(), modified, *size));
        }
        files.sort_by_key(|(_, modified, _)| *modified);
        files
    }

    /// Evicts least recently touched files down to 90 % of the limit.
    async fn cleanup_if_needed(&self, index: &mut DiskIndex) {
        if index.total <= self.max_size {
            return;
        }

        debug!(
            current_size = index.total,
            max_size = self.max_size,
            "Disk cache over limit, cleaning up"
        );

        let target = self.max_size - self.max_size / 10;
        let mut freed_size = 0u64;
        let mut freed_count = 0usize;

        for (stem, _, size) in self.scan_files(index).await {
            if index.total <= target {
                break;
            }
            let path = self.path_for_stem(&stem);
            match fs::remove_file(&path).await {
                Ok(()) => {
                    trace!(path = %path.display(), "Removed old cache file");
                    index.remove(&stem);
                    freed_size += size;
                    freed_count += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    index.remove(&stem);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove old cache file");
                }
            }
        }

        debug!(freed_size, freed_count, "Disk cache cleanup complete");
    }
}

fn cache_stem(path: &Path) -> Option<String> {
    if path.extension().is_none_or(|ext| ext != FILE_EXTENSION) {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

async fn touch(path: PathBuf) {
    let result = tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .append(true)
            .open(&path)?
            .set_modified(SystemTime::now())
    })
    .await;
    if let Ok(Err(e)) = result {
        trace!(error = %e, "Failed to refresh cache file time");
    }
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "linuxmobile", "imgfetch").map_or_else(
        || {
            std::env::temp_dir()
                .join("imgfetch")
                .join("cache")
                .join("images")
        },
        |dirs| dirs.cache_dir().join("images"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::TransformPipeline;
    use tempfile::TempDir;

    fn key(name: &str) -> CacheKey {
        CacheKey::derive(name, &TransformPipeline::new())
    }

    async fn create_test_cache(max_size: u64) -> (DiskImageCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskImageCache::new(temp_dir.path().to_path_buf(), max_size)
            .await
            .unwrap();
        (cache, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get_bytes() {
        let (cache, _temp) = create_test_cache(1024 * 1024).await;
        cache.put_bytes(&key("a"), b"test image data".to_vec()).await.unwrap();

        let retrieved = cache.get_bytes(&key("a")).await.unwrap();
        assert_eq!(retrieved.as_deref(), Some(&b"test image data"[..]));
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let (cache, _temp) = create_test_cache(1024 * 1024).await;
        assert!(cache.get_bytes(&key("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_named_by_digest() {
        let (cache, temp) = create_test_cache(1024 * 1024).await;
        cache.put_bytes(&key("a"), b"x".to_vec()).await.unwrap();

        let expected = temp.path().join(format!("{}.img", key("a").file_stem()));
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn test_remove() {
        let (cache, _temp) = create_test_cache(1024 * 1024).await;
        cache.put_bytes(&key("a"), b"test".to_vec()).await.unwrap();
        assert!(cache.contains(&key("a")).await);

        assert!(cache.remove(&key("a")).await.unwrap());
        assert!(!cache.contains(&key("a")).await);
        assert!(!cache.remove(&key("a")).await.unwrap());
    }

    #[tokio::test]
    async fn test_counters_follow_mutations() {
        let (cache, _temp) = create_test_cache(1024 * 1024).await;
        cache.put_bytes(&key("a"), b"hello".to_vec()).await.unwrap();
        cache.put_bytes(&key("b"), b"world!".to_vec()).await.unwrap();
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.current_size().await, 11);

        cache.put_bytes(&key("a"), b"hey".to_vec()).await.unwrap();
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.current_size().await, 9);

        cache.remove(&key("b")).await.unwrap();
        assert_eq!(cache.current_size().await, 3);

        cache.clear().await.unwrap();
        assert!(cache.is_empty().await);
        assert_eq!(cache.current_size().await, 0);
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = DiskImageCache::new(temp_dir.path().to_path_buf(), 1024)
                .await
                .unwrap();
            cache.put_bytes(&key("a"), b"persisted".to_vec()).await.unwrap();
        }
        let reopened = DiskImageCache::new(temp_dir.path().to_path_buf(), 1024)
            .await
            .unwrap();
        assert_eq!(reopened.len().await, 1);
        assert_eq!(
            reopened.get_bytes(&key("a")).await.unwrap().as_deref(),
            Some(&b"persisted"[..])
        );
    }

    #[tokio::test]
    async fn test_cleanup_evicts_oldest() {
        let (cache, _temp) = create_test_cache(10).await;
        cache.put_bytes(&key("a"), b"123456".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.put_bytes(&key("b"), b"123456".to_vec()).await.unwrap();

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.current_size().await, 6);
        assert!(cache.contains(&key("b")).await);
    }

    #[tokio::test]
    async fn test_access_refreshes_recency() {
        let (cache, _temp) = create_test_cache(20).await;
        cache.put_bytes(&key("a"), b"123456".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.put_bytes(&key("b"), b"123456".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.get_bytes(&key("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.put_bytes(&key("c"), b"0123456789".to_vec()).await.unwrap();

        assert!(cache.contains(&key("a")).await);
        assert!(!cache.contains(&key("b")).await);
        assert!(cache.contains(&key("c")).await);
        assert!(cache.current_size().await <= 18);
    }

    #[tokio::test]
    async fn test_remove_expired() {
        let (cache, _temp) = create_test_cache(1024).await;
        cache.put_bytes(&key("old"), b"1".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        cache.put_bytes(&key("new"), b"2".to_vec()).await.unwrap();

        let removed = cache.remove_expired(Duration::from_millis(30)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(cache.contains(&key("new")).await);
    }
}
