use super::app_config::LogLevel;
use crate::domain::entities::{ContentMode, Locator, TransformPipeline, TransformStep};
use crate::domain::errors::FetchError;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Command-line arguments. Global options override `config.toml`.
#[derive(Debug, Parser)]
#[command(
    name = "imgfetch",
    version,
    about = "Fetch, transform and cache images",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Downloads running at once.
    #[arg(long, global = true)]
    pub max_concurrent_downloads: Option<usize>,

    /// Request timeout in seconds.
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Retries for transient network failures.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Operation to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands of `imgfetch`.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch an image through the cache and optionally save it.
    Fetch(FetchArgs),
    /// Remove one cached variant of an image.
    Remove {
        /// URL or local path of the image.
        locator: String,

        /// Transforms naming the variant to remove.
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Clear cached images.
    Clear {
        /// Only clear the memory cache.
        #[arg(long, conflicts_with = "disk")]
        memory: bool,

        /// Only clear the disk cache.
        #[arg(long)]
        disk: bool,
    },
    /// Delete expired disk entries.
    Clean,
    /// Print cache statistics.
    Stats,
}

/// Arguments of `imgfetch fetch`.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// URL or local path of the image.
    pub locator: String,

    /// Transforms applied after decode.
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Also store the unprocessed image.
    #[arg(long)]
    pub cache_original: bool,

    /// Store processed images on disk as PNG.
    #[arg(long)]
    pub force_png: bool,

    /// Ignore cached copies.
    #[arg(long)]
    pub force_refresh: bool,

    /// Only serve from cache, never download.
    #[arg(long, conflicts_with = "force_refresh")]
    pub only_from_cache: bool,

    /// Report partial frames while downloading.
    #[arg(long)]
    pub progressive: bool,

    /// Decode only the first frame of animations.
    #[arg(long)]
    pub first_frame: bool,

    /// Write the result to this file.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

/// Transform flags shared by `fetch` and `remove`. Steps run in flag
/// declaration order.
#[derive(Debug, Default, Args)]
pub struct PipelineArgs {
    /// Cache key used instead of the locator.
    #[arg(long, value_name = "KEY")]
    pub key: Option<String>,

    /// Downsample to fit in a box.
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    pub downsample: Option<(u32, u32)>,

    /// Resize to a reference size.
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    pub resize: Option<(u32, u32)>,

    /// How `--resize` fits the image.
    #[arg(long, value_enum, default_value_t = ResizeMode::Fill)]
    pub mode: ResizeMode,

    /// Round corners with a radius in pixels.
    #[arg(long, value_name = "RADIUS")]
    pub round_corner: Option<f32>,

    /// Gaussian blur sigma.
    #[arg(long, value_name = "SIGMA")]
    pub blur: Option<f32>,

    /// Convert to grayscale.
    #[arg(long)]
    pub grayscale: bool,
}

/// How `--resize` maps the image onto the requested size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ResizeMode {
    /// Stretch to exactly the requested size.
    #[default]
    Fill,
    /// Scale to fit inside, keeping the aspect ratio.
    AspectFit,
    /// Scale to cover, keeping the aspect ratio.
    AspectFill,
}

impl From<ResizeMode> for ContentMode {
    fn from(mode: ResizeMode) -> Self {
        match mode {
            ResizeMode::Fill => Self::Fill,
            ResizeMode::AspectFit => Self::AspectFit,
            ResizeMode::AspectFill => Self::AspectFill,
        }
    }
}

impl PipelineArgs {
    /// Builds the transform pipeline described by the flags.
    #[must_use]
    pub fn to_pipeline(&self) -> TransformPipeline {
        let mut pipeline = TransformPipeline::new();
        if let Some((width, height)) = self.downsample {
            pipeline = pipeline.then(TransformStep::downsample(width, height));
        }
        if let Some((width, height)) = self.resize {
            pipeline = pipeline.then(TransformStep::resize(
                Some(width),
                Some(height),
                self.mode.into(),
            ));
        }
        if let Some(radius) = self.round_corner {
            pipeline = pipeline.then(TransformStep::round_corner(radius));
        }
        if let Some(sigma) = self.blur {
            pipeline = pipeline.then(TransformStep::blur(sigma));
        }
        if self.grayscale {
            pipeline = pipeline.then(TransformStep::Grayscale);
        }
        pipeline
    }
}

/// Accepts a URL or a local path, relative paths resolved against the
/// working directory.
///
/// # Errors
/// Returns `LocatorInvalid` for unsupported URLs or unresolvable paths.
pub fn resolve_locator(input: &str) -> Result<Locator, FetchError> {
    if input.contains("://") {
        return Locator::parse(input);
    }
    let path = std::path::absolute(input)
        .map_err(|e| FetchError::locator_invalid(input, e.to_string()))?;
    Locator::from_path(path)
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got {value:?}"))?;
    let width = width.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let height = height.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    Ok((width, height))
}
