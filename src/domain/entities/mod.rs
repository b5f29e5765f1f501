//! Domain entity definitions.

mod cache_key;
mod image;
mod locator;
mod pipeline;
mod request;

pub use cache_key::CacheKey;
pub use image::{AnimationFrame, DecodedImage, ImageSource, LoadedImage, ProgressiveFrame};
pub use locator::Locator;
pub use pipeline::{ContentMode, CornerRadius, RectCorners, TransformPipeline, TransformStep};
pub use request::{
    CacheSerializer, FetchEvent, FetchId, FetchOptions, FetchRequest, Priority,
    ProgressiveOptions,
};
