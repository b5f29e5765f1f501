//! Incremental decoding of partially received images.
//!
//! Progressive JPEGs are cut after the last complete scan and decoded with
//! an end-of-image marker appended. GIFs are cut after the last complete
//! frame. Other formats produce no partial output.

use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use tracing::trace;

use crate::domain::entities::{ProgressiveFrame, ProgressiveOptions, TransformPipeline};
use crate::domain::services::apply_pipeline;

use super::serializer::decode_partial_gif;

/// Lifecycle of a [`ProgressiveDecodeStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No bytes received yet.
    Idle,
    /// Bytes are arriving.
    Receiving,
    /// All bytes received.
    Complete,
    /// The transfer failed.
    Failed,
    /// The transfer was abandoned.
    Cancelled,
}

impl StreamState {
    /// Returns true for states that accept no further input.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Unknown,
    Jpeg,
    Gif,
    Other,
}

/// Walks JPEG markers, recording where each scan's entropy data ends.
#[derive(Debug, Default)]
struct JpegScanner {
    pos: usize,
    progressive: Option<bool>,
    in_scan: bool,
    finished: bool,
    scan_ends: Vec<usize>,
}

impl JpegScanner {
    fn advance(&mut self, data: &[u8]) {
        while !self.finished {
            if self.in_scan {
                let mut i = self.pos;
                while i + 1 < data.len() {
                    if data[i] != 0xFF {
                        i += 1;
                        continue;
                    }
                    match data[i + 1] {
                        // Stuffed zero and restart markers belong to the scan.
                        0x00 | 0xD0..=0xD7 => i += 2,
                        0xFF => i += 1,
                        _ => {
                            self.scan_ends.push(i);
                            self.in_scan = false;
                            break;
                        }
                    }
                }
                self.pos = i;
                if self.in_scan {
                    return;
                }
            }

            let Some(&[lead, marker]) = data.get(self.pos..self.pos + 2) else {
                return;
            };
            if lead != 0xFF {
                self.finished = true;
                return;
            }
            match marker {
                0xFF => self.pos += 1,
                0xD8 | 0x01 | 0xD0..=0xD7 => self.pos += 2,
                0xD9 => self.finished = true,
                _ => {
                    let Some(&[hi, lo]) = data.get(self.pos + 2..self.pos + 4) else {
                        return;
                    };
                    let length = usize::from(u16::from_be_bytes([hi, lo]));
                    if self.pos + 2 + length > data.len() {
                        return;
                    }
                    match marker {
                        0xC2 | 0xC6 | 0xCA | 0xCE => self.progressive = Some(true),
                        0xC0 | 0xC1 | 0xC3 | 0xC5 | 0xC7 | 0xC9 | 0xCB | 0xCD | 0xCF => {
                            self.progressive.get_or_insert(false);
                        }
                        _ => {}
                    }
                    self.pos += 2 + length;
                    if marker == 0xDA {
                        self.in_scan = true;
                    }
                }
            }
        }
    }
}

/// Walks GIF blocks, counting fully received frames.
#[derive(Debug, Default)]
struct GifScanner {
    pos: usize,
    frames: usize,
    finished: bool,
}

impl GifScanner {
    fn advance(&mut self, data: &[u8]) {
        if self.pos == 0 {
            let Some(&flags) = data.get(10) else {
                return;
            };
            self.pos = 13 + color_table_len(flags);
        }
        while !self.finished {
            let Some(&block) = data.get(self.pos) else {
                return;
            };
            match block {
                0x21 => {
                    let Some(end) = skip_sub_blocks(data, self.pos + 2) else {
                        return;
                    };
                    self.pos = end;
                }
                0x2C => {
                    let Some(&flags) = data.get(self.pos + 9) else {
                        return;
                    };
                    // Descriptor, local color table, LZW minimum code size.
                    let start = self.pos + 10 + color_table_len(flags) + 1;
                    let Some(end) = skip_sub_blocks(data, start) else {
                        return;
                    };
                    self.pos = end;
                    self.frames += 1;
                }
                _ => self.finished = true,
            }
        }
    }
}

fn color_table_len(flags: u8) -> usize {
    if flags & 0x80 == 0 {
        0
    } else {
        3 * (1 << ((flags & 0x07) + 1))
    }
}

fn skip_sub_blocks(data: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let size = usize::from(*data.get(pos)?);
        if size == 0 {
            return Some(pos + 1);
        }
        pos += 1 + size;
    }
}

#[derive(Debug)]
enum PartialKind {
    JpegScan { data: Vec<u8>, scan: usize },
    GifFrames { data: Vec<u8>, frames: usize },
}

/// Blocking decode job for the bytes available at one point of a transfer.
#[derive(Debug)]
pub struct PartialDecode {
    kind: PartialKind,
    bytes_received: u64,
    bytes_total: Option<u64>,
    blur_sigma: Option<f32>,
}

/// Result of [`PartialDecode::run`], ready to be emitted.
#[derive(Debug)]
pub struct PartialImage {
    /// Decoded, processed pixels.
    pub image: DynamicImage,
    bytes_received: u64,
    bytes_total: Option<u64>,
}

impl PartialDecode {
    /// Bytes received when the job was created.
    #[must_use]
    pub const fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Number of complete scans (JPEG) or frames (GIF) the job decodes.
    #[must_use]
    pub const fn depth(&self) -> usize {
        match &self.kind {
            PartialKind::JpegScan { scan, .. } => *scan,
            PartialKind::GifFrames { frames, .. } => *frames,
        }
    }

    /// Blur applied on top of the pipeline, if any.
    #[must_use]
    pub const fn blur_sigma(&self) -> Option<f32> {
        self.blur_sigma
    }

    /// Decodes the snapshot and applies `pipeline`. CPU bound.
    ///
    /// Returns `None` if the snapshot cannot be decoded yet.
    #[must_use]
    pub fn run(self, pipeline: &TransformPipeline) -> Option<PartialImage> {
        let image = match self.kind {
            PartialKind::JpegScan { data, .. } => {
                image::load_from_memory_with_format(&data, image::ImageFormat::Jpeg).ok()?
            }
            PartialKind::GifFrames { data, .. } => {
                decode_partial_gif(&data).pop().map(|frame| frame.image)?
            }
        };
        let mut image = apply_pipeline(pipeline, image);
        if let Some(sigma) = self.blur_sigma {
            image = image.blur(sigma);
        }
        Some(PartialImage {
            image,
            bytes_received: self.bytes_received,
            bytes_total: self.bytes_total,
        })
    }
}

/// Accumulates a transfer and decides when a partial frame is worth decoding.
#[derive(Debug)]
pub struct ProgressiveDecodeStream {
    options: ProgressiveOptions,
    state: StreamState,
    buffer: Vec<u8>,
    total: Option<u64>,
    format: Format,
    jpeg: JpegScanner,
    gif: GifScanner,
    shown: usize,
    last_emit: Option<Instant>,
    last_emitted_bytes: u64,
    index: u32,
}

impl ProgressiveDecodeStream {
    /// Creates an idle stream expecting `total` bytes, if known.
    #[must_use]
    pub fn new(options: ProgressiveOptions, total: Option<u64>) -> Self {
        Self {
            options,
            state: StreamState::Idle,
            buffer: Vec::new(),
            total,
            format: Format::Unknown,
            jpeg: JpegScanner::default(),
            gif: GifScanner::default(),
            shown: 0,
            last_emit: None,
            last_emitted_bytes: 0,
            index: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Bytes received so far.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Returns true once the data is known to be a progressive JPEG.
    #[must_use]
    pub fn is_progressive_jpeg(&self) -> bool {
        self.format == Format::Jpeg && self.jpeg.progressive == Some(true)
    }

    /// Appends a chunk. See [`Self::push_at`].
    pub fn push(&mut self, chunk: &[u8]) -> Option<PartialDecode> {
        self.push_at(chunk, Instant::now())
    }

    /// Appends a chunk received at `now` and returns a decode job when new
    /// scans or frames are available and the scan interval has elapsed.
    pub fn push_at(&mut self, chunk: &[u8], now: Instant) -> Option<PartialDecode> {
        if self.state.is_terminal() {
            return None;
        }
        self.state = StreamState::Receiving;
        self.buffer.extend_from_slice(chunk);

        if self.format == Format::Unknown {
            self.format = sniff(&self.buffer);
        }
        let available = match self.format {
            Format::Jpeg => {
                self.jpeg.advance(&self.buffer);
                if self.jpeg.progressive != Some(true) {
                    return None;
                }
                self.jpeg.scan_ends.len()
            }
            Format::Gif => {
                self.gif.advance(&self.buffer);
                self.gif.frames
            }
            Format::Unknown | Format::Other => return None,
        };

        if available <= self.shown {
            return None;
        }
        if let Some(last) = self.last_emit
            && now.saturating_duration_since(last) < self.options.scan_interval
        {
            return None;
        }

        let (kind, depth, blur_sigma) = if self.format == Format::Jpeg {
            let scan = if self.options.fastest_scan {
                available
            } else {
                self.shown + 1
            };
            let mut data = self.buffer[..self.jpeg.scan_ends[scan - 1]].to_vec();
            data.extend_from_slice(&[0xFF, 0xD9]);
            #[allow(clippy::cast_precision_loss)]
            let sigma = self
                .options
                .blur
                .then(|| (14.0 - 4.0 * scan as f32).max(2.0));
            (PartialKind::JpegScan { data, scan }, scan, sigma)
        } else {
            let mut data = self.buffer[..self.gif.pos].to_vec();
            data.push(0x3B);
            (
                PartialKind::GifFrames {
                    data,
                    frames: available,
                },
                available,
                None,
            )
        };

        self.shown = depth;
        self.last_emit = Some(now);
        trace!(depth, bytes = self.buffer.len(), "Scheduling partial decode");
        Some(PartialDecode {
            kind,
            bytes_received: self.bytes_received(),
            bytes_total: self.total,
            blur_sigma,
        })
    }

    /// Turns a decoded job into a frame, unless the stream left `Receiving`
    /// or a later frame was already emitted.
    pub fn emit(&mut self, partial: PartialImage) -> Option<ProgressiveFrame> {
        if self.state != StreamState::Receiving
            || partial.bytes_received < self.last_emitted_bytes
        {
            return None;
        }
        self.last_emitted_bytes = partial.bytes_received;
        let frame = ProgressiveFrame {
            image: Arc::new(partial.image),
            bytes_received: partial.bytes_received,
            bytes_total: partial.bytes_total,
            index: self.index,
        };
        self.index += 1;
        Some(frame)
    }

    /// Marks the transfer finished and hands over the full buffer.
    pub fn complete(&mut self) -> Option<Vec<u8>> {
        if self.state.is_terminal() {
            return None;
        }
        self.state = StreamState::Complete;
        Some(std::mem::take(&mut self.buffer))
    }

    /// Marks the transfer failed.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = StreamState::Failed;
            self.buffer = Vec::new();
        }
    }

    /// Abandons the transfer. No frames are emitted afterwards.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = StreamState::Cancelled;
            self.buffer = Vec::new();
        }
    }
}

fn sniff(buffer: &[u8]) -> Format {
    if buffer.len() < 6 {
        return Format::Unknown;
    }
    if buffer.starts_with(&[0xFF, 0xD8]) {
        Format::Jpeg
    } else if buffer.starts_with(b"GIF87a") || buffer.starts_with(b"GIF89a") {
        Format::Gif
    } else {
        Format::Other
    }
}
