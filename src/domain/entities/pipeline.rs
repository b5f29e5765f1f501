//! Transform pipeline definitions.
//!
//! A pipeline is an ordered list of steps. Its identifier is the JSON
//! serialization of that list, so two pipelines share an identifier only if
//! they contain the same steps with the same parameters in the same order.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::domain::errors::FetchError;

bitflags! {
    /// Corners affected by a round-corner step.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RectCorners: u8 {
        /// Top left corner.
        const TOP_LEFT = 1 << 0;
        /// Top right corner.
        const TOP_RIGHT = 1 << 1;
        /// Bottom left corner.
        const BOTTOM_LEFT = 1 << 2;
        /// Bottom right corner.
        const BOTTOM_RIGHT = 1 << 3;
    }
}

impl Default for RectCorners {
    fn default() -> Self {
        Self::all()
    }
}

/// How a resize step fits the source into the reference size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentMode {
    /// Stretch to exactly the reference size.
    #[default]
    Fill,
    /// Scale to fit inside the reference size, keeping aspect ratio.
    AspectFit,
    /// Scale to cover the reference size, keeping aspect ratio.
    AspectFill,
}

/// Corner radius of a round-corner step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CornerRadius {
    /// Absolute radius in pixels.
    Point(f32),
    /// Fraction of the image width.
    WidthFraction(f32),
    /// Fraction of the image height.
    HeightFraction(f32),
}

impl CornerRadius {
    /// Resolves the radius in pixels for an image of the given size.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn resolve(self, width: u32, height: u32) -> f32 {
        let radius = match self {
            Self::Point(r) => r,
            Self::WidthFraction(f) => width as f32 * f,
            Self::HeightFraction(f) => height as f32 * f,
        };
        radius.clamp(0.0, width.min(height) as f32 / 2.0)
    }

    const fn raw(self) -> f32 {
        match self {
            Self::Point(v) | Self::WidthFraction(v) | Self::HeightFraction(v) => v,
        }
    }
}

/// One named, parameterized image transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformStep {
    /// Shrink to fit inside `width` x `height`. Never enlarges.
    Downsample {
        /// Maximum width.
        width: u32,
        /// Maximum height.
        height: u32,
    },
    /// Resize towards a reference size. `None` leaves that side unbounded.
    Resize {
        /// Reference width.
        width: Option<u32>,
        /// Reference height.
        height: Option<u32>,
        /// Fitting mode.
        mode: ContentMode,
    },
    /// Clip corners to a radius, leaving them transparent or filled.
    RoundCorner {
        /// Corner radius.
        radius: CornerRadius,
        /// Corners to round.
        corners: RectCorners,
        /// RGBA fill for the clipped area, transparent when `None`.
        background: Option<[u8; 4]>,
    },
    /// Gaussian blur.
    Blur {
        /// Blur standard deviation.
        sigma: f32,
    },
    /// Convert to grayscale.
    Grayscale,
}

impl TransformStep {
    /// Downsample to fit inside the given box.
    #[must_use]
    pub const fn downsample(width: u32, height: u32) -> Self {
        Self::Downsample { width, height }
    }

    /// Resize to a reference size with the given mode.
    #[must_use]
    pub const fn resize(width: Option<u32>, height: Option<u32>, mode: ContentMode) -> Self {
        Self::Resize {
            width,
            height,
            mode,
        }
    }

    /// Round all corners with a radius in pixels.
    #[must_use]
    pub fn round_corner(radius: f32) -> Self {
        Self::RoundCorner {
            radius: CornerRadius::Point(radius),
            corners: RectCorners::all(),
            background: None,
        }
    }

    /// Blur with the given sigma.
    #[must_use]
    pub const fn blur(sigma: f32) -> Self {
        Self::Blur { sigma }
    }

    /// Short name of the step, used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Downsample { .. } => "downsample",
            Self::Resize { .. } => "resize",
            Self::RoundCorner { .. } => "round_corner",
            Self::Blur { .. } => "blur",
            Self::Grayscale => "grayscale",
        }
    }

    /// Checks the parameters.
    ///
    /// # Errors
    /// Returns `InvalidPipeline` for zero sizes or negative/non-finite values.
    pub fn validate(&self) -> Result<(), FetchError> {
        match self {
            Self::Downsample { width, height } => {
                if *width == 0 || *height == 0 {
                    return Err(FetchError::invalid_pipeline(
                        "downsample size must be non-zero",
                    ));
                }
            }
            Self::Resize { width, height, .. } => {
                if width.is_none() && height.is_none() {
                    return Err(FetchError::invalid_pipeline(
                        "resize needs at least one bounded side",
                    ));
                }
                if *width == Some(0) || *height == Some(0) {
                    return Err(FetchError::invalid_pipeline("resize size must be non-zero"));
                }
            }
            Self::RoundCorner { radius, .. } => {
                let raw = radius.raw();
                if !raw.is_finite() || raw < 0.0 {
                    return Err(FetchError::invalid_pipeline(format!(
                        "corner radius must be finite and non-negative, got {raw}"
                    )));
                }
            }
            Self::Blur { sigma } => {
                if !sigma.is_finite() || *sigma <= 0.0 {
                    return Err(FetchError::invalid_pipeline(format!(
                        "blur sigma must be finite and positive, got {sigma}"
                    )));
                }
            }
            Self::Grayscale => {}
        }
        Ok(())
    }

    /// Returns true if the output may carry an alpha channel the input lacked.
    #[must_use]
    pub const fn adds_alpha(&self) -> bool {
        matches!(self, Self::RoundCorner {
            background: None,
            ..
        })
    }
}

/// Ordered sequence of transform steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformPipeline {
    steps: Vec<TransformStep>,
}

impl TransformPipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub const fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Appends a step.
    #[must_use]
    pub fn then(mut self, step: TransformStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Returns the steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    /// Returns true when no step is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Deterministic identity of the pipeline. Empty for the empty pipeline.
    #[must_use]
    pub fn identifier(&self) -> String {
        if self.steps.is_empty() {
            return String::new();
        }
        // Serializing plain data enums cannot fail.
        serde_json::to_string(&self.steps).unwrap_or_default()
    }

    /// Validates every step.
    ///
    /// # Errors
    /// Returns the first step error.
    pub fn validate(&self) -> Result<(), FetchError> {
        self.steps.iter().try_for_each(TransformStep::validate)
    }

    /// Returns true if any step may introduce transparency.
    #[must_use]
    pub fn adds_alpha(&self) -> bool {
        self.steps.iter().any(TransformStep::adds_alpha)
    }
}

impl FromIterator<TransformStep> for TransformPipeline {
    fn from_iter<I: IntoIterator<Item = TransformStep>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}
