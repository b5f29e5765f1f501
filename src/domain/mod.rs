//! Domain layer with core entities, errors, ports and pure services.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;
/// Pure image transforms.
pub mod services;

pub use entities::{CacheKey, FetchRequest, Locator, TransformPipeline, TransformStep};
pub use errors::{CacheError, FetchError};
pub use ports::{ImageCachePort, ImageFetcherPort, ImageTarget};
