//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Image handling (fetching, caching, coordination, progressive decoding).
pub mod image;

pub use config::{AppConfig, CliArgs, LogLevel, StorageManager};
pub use image::{
    CacheStats, CoordinatorConfig, DiskImageCache, FetchCoordinator, FetchEvents, FetchHandle,
    HttpImageFetcher, ImageCache, ImageCacheConfig, MemoryImageCache,
};
