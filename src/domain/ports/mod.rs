mod image_cache_port;
mod image_fetcher_port;
mod image_target_port;

pub use image_cache_port::ImageCachePort;
pub use image_fetcher_port::{ByteStream, ImageFetcherPort};
pub use image_target_port::ImageTarget;

#[cfg(test)]
pub mod mocks {
    pub use super::image_fetcher_port::mock::MockImageFetcher;
    pub use super::image_target_port::mock::RecordingTarget;
}
