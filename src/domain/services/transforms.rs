//! Pure transform execution.
//!
//! All functions here are deterministic and free of I/O. They are CPU
//! heavy and should run off the async executor (`spawn_blocking`).

use image::DynamicImage;
use image::imageops::FilterType;

use crate::domain::entities::{
    AnimationFrame, ContentMode, CornerRadius, DecodedImage, RectCorners, TransformPipeline,
    TransformStep,
};

/// Runs every step of `pipeline` on `image`, in order.
#[must_use]
pub fn apply_pipeline(pipeline: &TransformPipeline, image: DynamicImage) -> DynamicImage {
    pipeline
        .steps()
        .iter()
        .fold(image, |image, step| apply_step(step, image))
}

/// Runs `pipeline` on the first frame and every animation frame.
#[must_use]
pub fn process_decoded(pipeline: &TransformPipeline, decoded: DecodedImage) -> DecodedImage {
    if pipeline.is_empty() {
        return decoded;
    }
    DecodedImage {
        image: apply_pipeline(pipeline, decoded.image),
        frames: decoded
            .frames
            .into_iter()
            .map(|frame| AnimationFrame {
                image: apply_pipeline(pipeline, frame.image),
                delay: frame.delay,
            })
            .collect(),
    }
}

/// Runs a single step.
#[must_use]
pub fn apply_step(step: &TransformStep, image: DynamicImage) -> DynamicImage {
    match step {
        TransformStep::Downsample { width, height } => {
            let target = calculate_downsample_dimensions(size(&image), (*width, *height));
            if target == size(&image) {
                image
            } else {
                image.resize_exact(target.0, target.1, FilterType::Triangle)
            }
        }
        TransformStep::Resize {
            width,
            height,
            mode,
        } => {
            let target = calculate_resize_dimensions(size(&image), *width, *height, *mode);
            if target == size(&image) {
                image
            } else {
                image.resize_exact(target.0, target.1, FilterType::Lanczos3)
            }
        }
        TransformStep::RoundCorner {
            radius,
            corners,
            background,
        } => round_corner(&image, *radius, *corners, *background),
        TransformStep::Blur { sigma } => image.blur(*sigma),
        TransformStep::Grayscale => image.grayscale(),
    }
}

fn size(image: &DynamicImage) -> (u32, u32) {
    (image.width(), image.height())
}

/// Dimensions after shrinking `source` to fit inside `max`. Never enlarges.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn calculate_downsample_dimensions(source: (u32, u32), max: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (max_w, max_h) = max;
    if src_w <= max_w && src_h <= max_h {
        return source;
    }
    let scale = (f64::from(max_w) / f64::from(src_w)).min(f64::from(max_h) / f64::from(src_h));
    (
        ((f64::from(src_w) * scale).round() as u32).max(1),
        ((f64::from(src_h) * scale).round() as u32).max(1),
    )
}

/// Dimensions after resizing `source` towards a reference size.
///
/// A `None` side is unbounded: with `Fill` it keeps the source length, with
/// the aspect modes only the bounded side decides the scale.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn calculate_resize_dimensions(
    source: (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
    mode: ContentMode,
) -> (u32, u32) {
    let (src_w, src_h) = source;
    if mode == ContentMode::Fill {
        return (width.unwrap_or(src_w), height.unwrap_or(src_h));
    }

    let scale_x = width.map(|w| f64::from(w) / f64::from(src_w));
    let scale_y = height.map(|h| f64::from(h) / f64::from(src_h));
    let scale = match (scale_x, scale_y) {
        (Some(x), Some(y)) if mode == ContentMode::AspectFit => x.min(y),
        (Some(x), Some(y)) => x.max(y),
        (Some(x), None) => x,
        (None, Some(y)) => y,
        (None, None) => 1.0,
    };
    (
        ((f64::from(src_w) * scale).round() as u32).max(1),
        ((f64::from(src_h) * scale).round() as u32).max(1),
    )
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn round_corner(
    image: &DynamicImage,
    radius: CornerRadius,
    corners: RectCorners,
    background: Option<[u8; 4]>,
) -> DynamicImage {
    let mut rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let r = radius.resolve(width, height);
    if r <= 0.0 || corners.is_empty() {
        return DynamicImage::ImageRgba8(rgba);
    }

    let (w, h) = (width as f32, height as f32);
    for (x, y, pixel) in rgba.enumerate_pixels_mut() {
        let px = x as f32 + 0.5;
        let py = y as f32 + 0.5;
        let left = px < r;
        let right = px > w - r;
        let top = py < r;
        let bottom = py > h - r;

        let corner = match (left, right, top, bottom) {
            (true, _, true, _) => RectCorners::TOP_LEFT,
            (_, true, true, _) => RectCorners::TOP_RIGHT,
            (true, _, _, true) => RectCorners::BOTTOM_LEFT,
            (_, true, _, true) => RectCorners::BOTTOM_RIGHT,
            _ => continue,
        };
        if !corners.contains(corner) {
            continue;
        }

        let dx = if left { r - px } else { px - (w - r) };
        let dy = if top { r - py } else { py - (h - r) };
        let coverage = (r - dx.hypot(dy) + 0.5).clamp(0.0, 1.0);
        if coverage >= 1.0 {
            continue;
        }

        match background {
            None => {
                pixel.0[3] = (f32::from(pixel.0[3]) * coverage).round() as u8;
            }
            Some(bg) => {
                for (channel, fill) in pixel.0.iter_mut().zip(bg) {
                    let blended =
                        f32::from(*channel) * coverage + f32::from(fill) * (1.0 - coverage);
                    *channel = blended.round() as u8;
                }
            }
        }
    }
    DynamicImage::ImageRgba8(rgba)
}
