//! Decoded image artifacts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::cache_key::CacheKey;

/// One frame of an animated image.
#[derive(Debug, Clone)]
pub struct AnimationFrame {
    /// Frame pixels.
    pub image: image::DynamicImage,
    /// Display duration.
    pub delay: Duration,
}

/// Fully decoded and processed artifact, as stored in the memory cache.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// First (or only) frame.
    pub image: image::DynamicImage,
    /// Animation frames. Empty for still images and when only the first
    /// frame was requested.
    pub frames: Vec<AnimationFrame>,
}

impl DecodedImage {
    /// Wraps a still image.
    #[must_use]
    pub const fn still(image: image::DynamicImage) -> Self {
        Self {
            image,
            frames: Vec::new(),
        }
    }

    /// Width of the first frame.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height of the first frame.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Returns true if more than one frame is present.
    #[must_use]
    pub fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }

    /// Approximate decoded size in bytes, used as memory cache cost.
    #[must_use]
    pub fn cost(&self) -> u64 {
        let frames: u64 = self.frames.iter().map(|f| pixel_bytes(&f.image)).sum();
        pixel_bytes(&self.image) + frames
    }
}

fn pixel_bytes(image: &image::DynamicImage) -> u64 {
    u64::from(image.width())
        * u64::from(image.height())
        * u64::from(image.color().bytes_per_pixel())
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from in-memory LRU cache.
    MemoryCache,
    /// Loaded from disk cache.
    DiskCache,
    /// Downloaded from network.
    Network,
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Successful result of a fetch.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Key the artifact is cached under.
    pub key: CacheKey,
    /// The decoded, processed artifact.
    pub image: Arc<DecodedImage>,
    /// Tier the artifact came from.
    pub source: ImageSource,
}

/// Partial image emitted while bytes are still arriving. Never cached.
#[derive(Debug, Clone)]
pub struct ProgressiveFrame {
    /// Partially decoded, processed pixels.
    pub image: Arc<image::DynamicImage>,
    /// Bytes received when the frame was decoded.
    pub bytes_received: u64,
    /// Expected total bytes, if known.
    pub bytes_total: Option<u64>,
    /// Emission counter, starting at 0.
    pub index: u32,
}
