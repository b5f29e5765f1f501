//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::entities::ProgressiveOptions;
use crate::infrastructure::image::{
    CoordinatorConfig, DEFAULT_MAX_CACHE_SIZE, DEFAULT_USER_AGENT, HttpFetcherConfig,
    ImageCacheConfig, MemoryCacheConfig,
};

const APP_NAME: &str = "imgfetch";
const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration, read from `config.toml` and CLI overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Cache bounds and location.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Download behaviour.
    #[serde(default)]
    pub fetch: FetchSettings,

    /// Partial frame emission.
    #[serde(default)]
    pub progressive: ProgressiveSettings,
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Maximum number of decoded images kept in memory.
    #[serde(default = "default_memory_count_limit")]
    pub memory_count_limit: usize,

    /// Maximum summed decoded size in bytes.
    #[serde(default = "default_memory_cost_limit")]
    pub memory_cost_limit: u64,

    /// Idle time after which a memory entry expires. Unset keeps entries
    /// until evicted.
    #[serde(default)]
    pub memory_expiration_secs: Option<u64>,

    /// Disk cache size limit in bytes.
    #[serde(default = "default_disk_size_limit")]
    pub disk_size_limit: u64,

    /// Disk cache directory. Unset uses the platform cache directory.
    #[serde(default)]
    pub disk_dir: Option<PathBuf>,

    /// Age in days after which disk entries are cleaned. Unset disables
    /// expiration.
    #[serde(default = "default_disk_expiration_days")]
    pub disk_expiration_days: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_count_limit: default_memory_count_limit(),
            memory_cost_limit: default_memory_cost_limit(),
            memory_expiration_secs: None,
            disk_size_limit: default_disk_size_limit(),
            disk_dir: None,
            disk_expiration_days: default_disk_expiration_days(),
        }
    }
}

/// `[fetch]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Downloads running at once.
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Whole-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for transient network failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retries in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// `User-Agent` header value.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent_downloads(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            user_agent: default_user_agent(),
        }
    }
}

/// `[progressive]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressiveSettings {
    /// Minimum milliseconds between two partial frames.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Blur early scans.
    #[serde(default = "default_true")]
    pub blur: bool,

    /// Skip to the latest complete scan.
    #[serde(default = "default_true")]
    pub fastest_scan: bool,
}

impl Default for ProgressiveSettings {
    fn default() -> Self {
        Self {
            scan_interval_ms: default_scan_interval_ms(),
            blur: true,
            fastest_scan: true,
        }
    }
}

const fn default_memory_count_limit() -> usize {
    200
}

const fn default_memory_cost_limit() -> u64 {
    256 * 1024 * 1024
}

const fn default_disk_size_limit() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

#[allow(clippy::unnecessary_wraps)]
const fn default_disk_expiration_days() -> Option<u64> {
    Some(7)
}

const fn default_max_concurrent_downloads() -> usize {
    4
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_retry_delay_ms() -> u64 {
    500
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

const fn default_scan_interval_ms() -> u64 {
    100
}

const fn default_true() -> bool {
    true
}

use super::args::CliArgs;

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache.disk_dir = Some(cache_dir.clone());
        }
        if let Some(max_concurrent) = args.max_concurrent_downloads {
            self.fetch.max_concurrent_downloads = max_concurrent;
        }
        if let Some(timeout) = args.timeout_secs {
            self.fetch.timeout_secs = timeout;
        }
        if let Some(retries) = args.max_retries {
            self.fetch.max_retries = retries;
        }
    }

    /// Memory and disk cache settings.
    #[must_use]
    pub fn image_cache_config(&self) -> ImageCacheConfig {
        let cache = &self.cache;
        ImageCacheConfig {
            memory: MemoryCacheConfig {
                count_limit: cache.memory_count_limit,
                cost_limit: cache.memory_cost_limit,
                expiration: cache.memory_expiration_secs.map(Duration::from_secs),
            },
            disk_dir: cache.disk_dir.clone(),
            disk_size_limit: cache.disk_size_limit,
            disk_expiration: cache
                .disk_expiration_days
                .map(|days| Duration::from_secs(days * 24 * 60 * 60)),
        }
    }

    /// Coordinator settings.
    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_concurrent_downloads: self.fetch.max_concurrent_downloads,
            max_retries: self.fetch.max_retries,
            retry_delay: Duration::from_millis(self.fetch.retry_delay_ms),
        }
    }

    /// HTTP client settings.
    #[must_use]
    pub fn fetcher_config(&self) -> HttpFetcherConfig {
        HttpFetcherConfig {
            timeout: Duration::from_secs(self.fetch.timeout_secs),
            user_agent: self.fetch.user_agent.clone(),
        }
    }

    /// Options used when a request asks for progressive frames.
    #[must_use]
    pub fn progressive_options(&self) -> ProgressiveOptions {
        ProgressiveOptions {
            blur: self.progressive.blur,
            fastest_scan: self.progressive.fastest_scan,
            scan_interval: Duration::from_millis(self.progressive.scan_interval_ms),
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("imgfetch.log"))
    }

    /// Returns effective config path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config: None,
            log_path: None,
            log_level: LogLevel::Info,
            cache: CacheSettings::default(),
            fetch: FetchSettings::default(),
            progressive: ProgressiveSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
            log_level = "debug"

            [cache]
            memory_count_limit = 50
            disk_expiration_days = 30

            [fetch]
            max_retries = 5

            [progressive]
            blur = false
        "#;

        let config: AppConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.cache.memory_count_limit, 50);
        assert_eq!(config.cache.memory_cost_limit, default_memory_cost_limit());
        assert_eq!(config.fetch.max_retries, 5);
        assert_eq!(config.fetch.max_concurrent_downloads, 4);
        assert!(!config.progressive.blur);
        assert!(config.progressive.fastest_scan);

        let cache = config.image_cache_config();
        assert_eq!(cache.memory.count_limit, 50);
        assert_eq!(cache.disk_expiration, Some(Duration::from_secs(30 * 86_400)));
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.cache.disk_expiration_days, Some(7));
        assert_eq!(config.cache.memory_expiration_secs, None);
        assert_eq!(config.coordinator_config().retry_delay, Duration::from_millis(500));
        assert_eq!(config.fetcher_config().timeout, Duration::from_secs(30));
        assert_eq!(
            config.progressive_options().scan_interval,
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_default_config_survives_toml() {
        let text = toml::to_string_pretty(&AppConfig::default()).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.cache, CacheSettings::default());
        assert_eq!(parsed.fetch, FetchSettings::default());
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = AppConfig::default();
        let args = CliArgs::parse_from([
            "imgfetch",
            "--log-level",
            "trace",
            "--max-retries",
            "0",
            "--cache-dir",
            "/tmp/images",
            "stats",
        ]);
        config.merge_with_args(&args);

        assert_eq!(config.log_level, LogLevel::Trace);
        assert_eq!(config.fetch.max_retries, 0);
        assert_eq!(config.cache.disk_dir, Some(PathBuf::from("/tmp/images")));
        assert_eq!(config.fetch.timeout_secs, 30);
    }
}
