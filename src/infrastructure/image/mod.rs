//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with cost-bounded LRU eviction
//! - Disk caching of encoded bytes
//! - HTTP and file byte fetching
//! - Request coordination with de-duplication and cancellation
//! - Progressive decoding of partial transfers

pub mod cache;
pub mod coordinator;
pub mod disk_cache;
pub mod fetcher;
pub mod gate;
pub mod memory_cache;
pub mod progressive;
pub mod serializer;

pub use cache::{DiskStats, ImageCache, ImageCacheConfig};
pub use coordinator::{
    CoordinatorConfig, CoordinatorStats, FetchCoordinator, FetchEvents, FetchHandle,
};
pub use disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskImageCache, default_cache_dir};
pub use fetcher::{DEFAULT_USER_AGENT, HttpFetcherConfig, HttpImageFetcher, classify_status};
pub use gate::{GatePermit, PriorityGate};
pub use memory_cache::{CacheStats, MemoryCacheConfig, MemoryImageCache};
pub use progressive::{PartialDecode, PartialImage, ProgressiveDecodeStream, StreamState};
pub use serializer::{decode_image, encode_for_cache};
