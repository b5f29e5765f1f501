//! Fixtures shared by unit tests.

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::gif::GifEncoder;
use image::{Delay, DynamicImage, Frame, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use tempfile::TempDir;

use crate::infrastructure::image::{DiskImageCache, ImageCache, MemoryCacheConfig, MemoryImageCache};

fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// Opaque PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([30, 120, 200, 255]));
    encode(&DynamicImage::ImageRgba8(image), ImageFormat::Png)
}

/// Baseline JPEG of the given size.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 90])
    });
    encode(&DynamicImage::ImageRgb8(image), ImageFormat::Jpeg)
}

/// 32x32 grayscale progressive JPEG with four spectral scans
/// (DC, AC 1-2, AC 3-9, AC 10-63). Pixel `(x, y)` encodes
/// [`progressive_jpeg_pixel`].
pub const PROGRESSIVE_JPEG: &[u8] = include_bytes!("../testdata/progressive.jpg");

/// Source value of [`PROGRESSIVE_JPEG`] at `(x, y)`.
pub fn progressive_jpeg_pixel(x: u32, y: u32) -> u8 {
    let checker = if (x / 8 + y / 8) % 2 == 1 { 40 } else { 0 };
    ((x * 6 + y * 3 + checker) % 256) as u8
}

/// Animated GIF with `frames` distinct frames.
pub fn gif_bytes(frames: u32, width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buf);
        let frames = (0..frames).map(|i| {
            let shade = (i * 80 % 256) as u8;
            Frame::from_parts(
                RgbaImage::from_pixel(width, height, Rgba([shade, 255 - shade, 0, 255])),
                0,
                0,
                Delay::from_numer_denom_ms(50, 1),
            )
        });
        encoder.encode_frames(frames).unwrap();
    }
    buf
}

/// Cache backed by a fresh temporary directory. Keep the `TempDir` alive.
pub async fn test_cache(memory: MemoryCacheConfig) -> (Arc<ImageCache>, TempDir) {
    let dir = TempDir::new().unwrap();
    let disk = DiskImageCache::new(dir.path().to_path_buf(), 64 * 1024 * 1024)
        .await
        .unwrap();
    let cache = ImageCache::new(MemoryImageCache::new(memory), Some(disk));
    (Arc::new(cache), dir)
}
