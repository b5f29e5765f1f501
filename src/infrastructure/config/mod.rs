//! Application configuration.

pub mod app_config;
pub mod args;
pub mod storage;

pub use app_config::{AppConfig, CacheSettings, FetchSettings, LogLevel, ProgressiveSettings};
pub use args::{CliArgs, Command, FetchArgs, PipelineArgs, ResizeMode, resolve_locator};
pub use storage::{ConfigError, StorageManager};
