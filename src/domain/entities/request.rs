//! Fetch request, options and events.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::cache_key::CacheKey;
use super::image::{LoadedImage, ProgressiveFrame};
use super::locator::Locator;
use super::pipeline::{TransformPipeline, TransformStep};
use crate::domain::errors::FetchError;

/// Identifier of one caller's attachment to a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchId(pub u64);

impl fmt::Display for FetchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Download queue priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Served after everything else.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Served first.
    High,
}

/// How processed images are encoded for the disk cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSerializer {
    /// Keep the source format. Unprocessed images are stored byte for byte;
    /// processed images are re-encoded in the source format, so formats
    /// without alpha (JPEG) lose transparency added by the pipeline.
    #[default]
    Original,
    /// Always re-encode as PNG, preserving alpha.
    ForcePng,
}

/// Incremental decoding options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressiveOptions {
    /// Blur partial frames, more strongly for early scans.
    pub blur: bool,
    /// Jump straight to the latest complete scan instead of one scan per emission.
    pub fastest_scan: bool,
    /// Minimum time between two emitted frames.
    #[serde(with = "duration_millis")]
    pub scan_interval: Duration,
}

impl Default for ProgressiveOptions {
    fn default() -> Self {
        Self {
            blur: true,
            fastest_scan: true,
            scan_interval: Duration::from_millis(100),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Per-request behaviour switches.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    /// Download queue priority.
    pub priority: Priority,
    /// Skip both cache tiers and download again.
    pub force_refresh: bool,
    /// Fail with `NotCached` instead of downloading.
    pub only_from_cache: bool,
    /// Do not write to the disk cache.
    pub cache_memory_only: bool,
    /// Also store the unprocessed bytes under the unprocessed key.
    pub cache_original_image: bool,
    /// Disk encoding policy for processed images.
    pub serializer: CacheSerializer,
    /// Emit partial frames while downloading.
    pub progressive: Option<ProgressiveOptions>,
    /// Decode only the first frame of animated images.
    pub only_load_first_frame: bool,
    /// Deliver the result only after disk writes finished.
    pub wait_for_cache: bool,
}

const FIRST_FRAME_IDENTITY: &str = "first-frame";

/// One request for an image.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Where to fetch bytes from.
    pub locator: Locator,
    /// Source key override. Defaults to the locator string.
    pub cache_key: Option<String>,
    /// Transforms applied after decode.
    pub pipeline: TransformPipeline,
    /// Behaviour switches.
    pub options: FetchOptions,
}

impl FetchRequest {
    /// Creates a request with no transforms and default options.
    #[must_use]
    pub fn new(locator: Locator) -> Self {
        Self {
            locator,
            cache_key: None,
            pipeline: TransformPipeline::new(),
            options: FetchOptions::default(),
        }
    }

    /// Overrides the source key used for caching.
    #[must_use]
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Replaces the pipeline.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: TransformPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Appends one transform step.
    #[must_use]
    pub fn with_step(mut self, step: TransformStep) -> Self {
        self.pipeline = self.pipeline.then(step);
        self
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the source key (custom key or locator string).
    #[must_use]
    pub fn source_key(&self) -> &str {
        self.cache_key
            .as_deref()
            .unwrap_or_else(|| self.locator.as_str())
    }

    /// Returns the cache key of the processed artifact.
    ///
    /// First-frame decodes of animations are a different artifact than the
    /// full animation and get their own key.
    #[must_use]
    pub fn key(&self) -> CacheKey {
        if !self.options.only_load_first_frame {
            return CacheKey::derive(self.source_key(), &self.pipeline);
        }
        let identity = match self.pipeline.identifier() {
            id if id.is_empty() => FIRST_FRAME_IDENTITY.to_string(),
            id => format!("{id}#{FIRST_FRAME_IDENTITY}"),
        };
        CacheKey::from_parts(self.source_key(), &identity)
    }
}

/// Event delivered to one fetch handle.
#[derive(Debug, Clone)]
pub enum FetchEvent {
    /// Bytes received so far. Never decreases for one handle.
    Progress {
        /// Bytes received.
        received: u64,
        /// Expected total, if known.
        total: Option<u64>,
    },
    /// Partial frame from the progressive decoder.
    Frame(ProgressiveFrame),
    /// Terminal event, delivered exactly once.
    Completed(Result<LoadedImage, FetchError>),
}

impl FetchEvent {
    /// Returns true for the terminal event.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> Locator {
        Locator::parse("https://example.com/a.jpg").unwrap()
    }

    #[test]
    fn test_source_key_defaults_to_locator() {
        let request = FetchRequest::new(locator());
        assert_eq!(request.source_key(), "https://example.com/a.jpg");
    }

    #[test]
    fn test_custom_key_replaces_locator() {
        let a = FetchRequest::new(locator()).with_cache_key("a-imageview");
        let b = FetchRequest::new(locator()).with_cache_key("a-animated");
        assert_eq!(a.source_key(), "a-imageview");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_key_includes_pipeline() {
        let plain = FetchRequest::new(locator());
        let rounded = FetchRequest::new(locator()).with_step(TransformStep::round_corner(30.0));
        assert_ne!(plain.key(), rounded.key());
        assert_eq!(rounded.key().original(), plain.key());
    }

    #[test]
    fn test_first_frame_key_is_separate_variant() {
        let full = FetchRequest::new(locator());
        let mut still = FetchRequest::new(locator());
        still.options.only_load_first_frame = true;
        let mut rounded_still = still.clone().with_step(TransformStep::round_corner(8.0));
        rounded_still.options.only_load_first_frame = true;

        assert_ne!(full.key(), still.key());
        assert_ne!(still.key(), rounded_still.key());
        assert_eq!(still.key().original(), full.key());
        assert_eq!(rounded_still.key().original(), full.key());
    }

    #[test]
    fn test_progressive_options_toml_round_trip() {
        let options = ProgressiveOptions {
            blur: false,
            fastest_scan: true,
            scan_interval: Duration::from_millis(250),
        };
        let text = toml::to_string(&options).unwrap();
        assert!(text.contains("scan_interval = 250"));
        let parsed: ProgressiveOptions = toml::from_str(&text).unwrap();
        assert_eq!(parsed, options);
    }
}
