//! Conversion between decoded images and the bytes kept on disk.

use std::io::Cursor;
use std::time::Duration;

use image::codecs::gif::{GifDecoder, GifEncoder};
use image::{AnimationDecoder, Delay, DynamicImage, Frame, ImageFormat};

use crate::domain::entities::{AnimationFrame, CacheSerializer, DecodedImage};
use crate::domain::errors::{CacheError, CacheResult};

/// Decodes `bytes`, keeping every GIF frame unless `only_first_frame`.
///
/// # Errors
/// Returns `CacheError::Decode` if the format is unknown or the data is corrupt.
pub fn decode_image(bytes: &[u8], only_first_frame: bool) -> CacheResult<DecodedImage> {
    let format = image::guess_format(bytes)
        .map_err(|e| CacheError::Decode(format!("Unknown image format: {e}")))?;

    if format == ImageFormat::Gif && !only_first_frame {
        let frames = decode_gif_frames(bytes)?;
        if frames.len() > 1 {
            return Ok(DecodedImage {
                image: frames[0].image.clone(),
                frames,
            });
        }
    }

    image::load_from_memory_with_format(bytes, format)
        .map(DecodedImage::still)
        .map_err(|e| CacheError::Decode(format!("Failed to decode image: {e}")))
}

/// Decodes every complete frame of a GIF.
///
/// # Errors
/// Returns `CacheError::Decode` if the header or a frame is corrupt.
pub fn decode_gif_frames(bytes: &[u8]) -> CacheResult<Vec<AnimationFrame>> {
    let decoder = GifDecoder::new(Cursor::new(bytes))
        .map_err(|e| CacheError::Decode(format!("Failed to read GIF: {e}")))?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| CacheError::Decode(format!("Failed to decode GIF frame: {e}")))?;
    Ok(frames.into_iter().map(to_animation_frame).collect())
}

/// Decodes the GIF frames that are complete in a truncated buffer.
pub fn decode_partial_gif(bytes: &[u8]) -> Vec<AnimationFrame> {
    let Ok(decoder) = GifDecoder::new(Cursor::new(bytes)) else {
        return Vec::new();
    };
    decoder
        .into_frames()
        .map_while(Result::ok)
        .map(to_animation_frame)
        .collect()
}

fn to_animation_frame(frame: Frame) -> AnimationFrame {
    let (numer, denom) = frame.delay().numer_denom_ms();
    let delay = Duration::from_micros(u64::from(numer) * 1000 / u64::from(denom.max(1)));
    AnimationFrame {
        image: DynamicImage::ImageRgba8(frame.into_buffer()),
        delay,
    }
}

/// Produces the bytes stored on disk for `image`.
///
/// `original` holds the bytes the image was decoded from; `processed`
/// tells whether a transform pipeline changed the pixels since.
///
/// # Errors
/// Returns `CacheError::Encode` if the image cannot be encoded.
pub fn encode_for_cache(
    policy: CacheSerializer,
    image: &DecodedImage,
    original: &[u8],
    processed: bool,
) -> CacheResult<Vec<u8>> {
    match policy {
        CacheSerializer::ForcePng => encode_png(&image.image),
        CacheSerializer::Original if !processed => Ok(original.to_vec()),
        CacheSerializer::Original => match image::guess_format(original) {
            // JPEG has no alpha channel: transparency added by a transform is lost.
            Ok(ImageFormat::Jpeg) => encode_with_format(
                &DynamicImage::ImageRgb8(image.image.to_rgb8()),
                ImageFormat::Jpeg,
            ),
            Ok(ImageFormat::Gif) => encode_gif(image),
            Ok(ImageFormat::WebP) => encode_with_format(
                &DynamicImage::ImageRgba8(image.image.to_rgba8()),
                ImageFormat::WebP,
            ),
            _ => encode_png(&image.image),
        },
    }
}

fn encode_png(image: &DynamicImage) -> CacheResult<Vec<u8>> {
    encode_with_format(image, ImageFormat::Png)
}

fn encode_with_format(image: &DynamicImage, format: ImageFormat) -> CacheResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, format)
        .map_err(|e| CacheError::Encode(format!("Failed to encode {format:?}: {e}")))?;
    Ok(buf.into_inner())
}

fn encode_gif(image: &DecodedImage) -> CacheResult<Vec<u8>> {
    let frames: Vec<Frame> = if image.frames.is_empty() {
        vec![Frame::new(image.image.to_rgba8())]
    } else {
        image
            .frames
            .iter()
            .map(|frame| {
                Frame::from_parts(
                    frame.image.to_rgba8(),
                    0,
                    0,
                    Delay::from_saturating_duration(frame.delay),
                )
            })
            .collect()
    };

    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buf);
        encoder
            .encode_frames(frames)
            .map_err(|e| CacheError::Encode(format!("Failed to encode GIF: {e}")))?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{gif_bytes, jpeg_bytes, png_bytes};

    #[test]
    fn test_decode_png() {
        let decoded = decode_image(&png_bytes(12, 8), false).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 8));
        assert!(decoded.frames.is_empty());
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode_image(b"definitely not an image", false);
        assert!(matches!(result, Err(CacheError::Decode(_))));
    }

    #[test]
    fn test_decode_animated_gif_frames() {
        let bytes = gif_bytes(3, 6, 6);
        let decoded = decode_image(&bytes, false).unwrap();
        assert_eq!(decoded.frames.len(), 3);
        assert!(decoded.is_animated());

        let first_only = decode_image(&bytes, true).unwrap();
        assert!(first_only.frames.is_empty());
        assert_eq!(first_only.width(), 6);
    }

    #[test]
    fn test_partial_gif_returns_complete_frames_only() {
        let bytes = gif_bytes(3, 6, 6);
        assert!(decode_partial_gif(&bytes[..10]).is_empty());
        assert_eq!(decode_partial_gif(&bytes).len(), 3);
    }

    #[test]
    fn test_unprocessed_original_kept_verbatim() {
        let original = jpeg_bytes(16, 16);
        let decoded = decode_image(&original, false).unwrap();
        let stored =
            encode_for_cache(CacheSerializer::Original, &decoded, &original, false).unwrap();
        assert_eq!(stored, original);
    }

    #[test]
    fn test_processed_jpeg_loses_alpha() {
        let original = jpeg_bytes(16, 16);
        let rounded = DecodedImage::still(DynamicImage::new_rgba8(16, 16));
        let stored =
            encode_for_cache(CacheSerializer::Original, &rounded, &original, true).unwrap();

        assert_eq!(image::guess_format(&stored).unwrap(), ImageFormat::Jpeg);
        let reloaded = decode_image(&stored, false).unwrap();
        assert!(!reloaded.image.color().has_alpha());
    }

    #[test]
    fn test_force_png_keeps_alpha() {
        let original = jpeg_bytes(16, 16);
        let rounded = DecodedImage::still(DynamicImage::new_rgba8(16, 16));
        let stored =
            encode_for_cache(CacheSerializer::ForcePng, &rounded, &original, true).unwrap();

        assert_eq!(image::guess_format(&stored).unwrap(), ImageFormat::Png);
        let reloaded = decode_image(&stored, false).unwrap();
        assert!(reloaded.image.color().has_alpha());
    }

    #[test]
    fn test_processed_gif_keeps_animation() {
        let original = gif_bytes(2, 4, 4);
        let decoded = decode_image(&original, false).unwrap();
        let stored = encode_for_cache(CacheSerializer::Original, &decoded, &original, true).unwrap();
        assert_eq!(decode_image(&stored, false).unwrap().frames.len(), 2);
    }
}
