//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::ingest::{default_high_volume_subsystems, IngestOptions, LookbackWindow};
use crate::search::DEFAULT_BATCH_SIZE;
use crate::view::ViewOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub view: ViewConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Archive loading configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_chunk_count")]
    pub chunk_count: usize,

    #[serde(default = "default_chunk_power")]
    pub chunk_power: f64,

    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_allow_fallback")]
    pub allow_fallback: bool,

    #[serde(default)]
    pub force_slow_path: bool,

    #[serde(default = "default_slow_windows")]
    pub slow_windows_secs: Vec<u64>,

    #[serde(default = "default_high_volume_subsystems")]
    pub high_volume_subsystems: Vec<String>,

    #[serde(default = "default_lookback_windows")]
    pub lookback: Vec<LookbackConfig>,
}

/// A progress window reaching back from the archive end
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LookbackConfig {
    pub name: String,
    /// Omitted for the whole archive
    pub minutes: Option<u64>,
}

fn default_chunk_count() -> usize {
    64
}

fn default_chunk_power() -> f64 {
    2.0
}

fn default_min_workers() -> usize {
    4
}

fn default_max_workers() -> usize {
    8
}

fn default_allow_fallback() -> bool {
    true
}

fn default_slow_windows() -> Vec<u64> {
    vec![5 * 60, 30 * 60]
}

fn default_lookback_windows() -> Vec<LookbackConfig> {
    vec![
        LookbackConfig {
            name: "Last 5 Minutes".to_string(),
            minutes: Some(5),
        },
        LookbackConfig {
            name: "Last Hour".to_string(),
            minutes: Some(60),
        },
        LookbackConfig {
            name: "All".to_string(),
            minutes: None,
        },
    ]
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_count: default_chunk_count(),
            chunk_power: default_chunk_power(),
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            allow_fallback: default_allow_fallback(),
            force_slow_path: false,
            slow_windows_secs: default_slow_windows(),
            high_volume_subsystems: default_high_volume_subsystems(),
            lookback: default_lookback_windows(),
        }
    }
}

impl IngestConfig {
    pub fn to_options(&self) -> IngestOptions {
        IngestOptions {
            chunk_count: self.chunk_count,
            chunk_power: self.chunk_power,
            min_workers: self.min_workers,
            max_workers: self.max_workers,
            allow_fallback: self.allow_fallback,
            force_slow_path: self.force_slow_path,
            slow_windows: self
                .slow_windows_secs
                .iter()
                .map(|s| chrono::Duration::seconds(*s as i64))
                .collect(),
            high_volume_subsystems: self.high_volume_subsystems.clone(),
        }
    }

    pub fn lookback_windows(&self) -> Vec<LookbackWindow> {
        self.lookback
            .iter()
            .map(|w| match w.minutes {
                Some(minutes) => {
                    LookbackWindow::new(w.name.clone(), chrono::Duration::minutes(minutes as i64))
                }
                None => LookbackWindow::all(w.name.clone()),
            })
            .collect()
    }
}

/// View regeneration configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_batches")]
    pub batches: usize,

    #[serde(default = "default_search_batch_size")]
    pub search_batch_size: usize,
}

fn default_batches() -> usize {
    16
}

fn default_search_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            batches: default_batches(),
            search_batch_size: default_search_batch_size(),
        }
    }
}

impl ViewConfig {
    pub fn to_options(&self) -> ViewOptions {
        ViewOptions {
            batches: self.batches,
            search_batch_size: self.search_batch_size,
        }
    }
}

/// Persistent storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_saved_queries_path")]
    pub saved_queries_path: String,
}

fn default_saved_queries_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("logscope").join("queries.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./logscope_queries.db".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            saved_queries_path: default_saved_queries_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Default config file locations, most specific last
    pub fn default_paths() -> Vec<PathBuf> {
        [
            dirs::config_dir().map(|p| p.join("logscope").join("config.toml")),
            Some(PathBuf::from("./logscope.toml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        for path in Self::default_paths() {
            if path.exists() {
                match Self::load_with_env(&path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::debug!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Ingest overrides
        if let Ok(count) = std::env::var("LOGSCOPE_CHUNK_COUNT") {
            if let Ok(c) = count.parse() {
                self.ingest.chunk_count = c;
            }
        }
        if let Ok(workers) = std::env::var("LOGSCOPE_MAX_WORKERS") {
            if let Ok(w) = workers.parse() {
                self.ingest.max_workers = w;
            }
        }
        if let Ok(slow) = std::env::var("LOGSCOPE_FORCE_SLOW_PATH") {
            self.ingest.force_slow_path = matches!(slow.as_str(), "1" | "true" | "yes");
        }

        // Storage overrides
        if let Ok(path) = std::env::var("LOGSCOPE_SAVED_QUERIES") {
            self.storage.saved_queries_path = path;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("LOGSCOPE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOGSCOPE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# logscope Configuration
#
# Environment variables override these settings:
# - LOGSCOPE_CHUNK_COUNT
# - LOGSCOPE_MAX_WORKERS
# - LOGSCOPE_FORCE_SLOW_PATH
# - LOGSCOPE_SAVED_QUERIES
# - LOGSCOPE_LOG_LEVEL
# - LOGSCOPE_LOG_FORMAT

[ingest]
# Number of time chunks streamed concurrently
chunk_count = 64

# Chunk weighting; above 1.0 makes recent chunks narrower
chunk_power = 2.0

# Worker bounds; the core count is clamped into this range
min_workers = 4
max_workers = 8

# Fall back to predicate queries when streaming fails
allow_fallback = true

# Always use predicate queries
force_slow_path = false

# Predicate-query windows (seconds) before loading everything
slow_windows_secs = [300, 1800]

# Subsystems queried separately when loading everything
high_volume_subsystems = [
    "com.apple.network",
    "com.apple.CFNetwork",
    "com.apple.runningboard",
    "com.apple.xpc",
    "com.apple.launchservices",
    "com.apple.bluetooth",
    "com.apple.coreanalytics",
    "com.apple.defaults",
]

# Progress windows reported while loading
[[ingest.lookback]]
name = "Last 5 Minutes"
minutes = 5

[[ingest.lookback]]
name = "Last Hour"
minutes = 60

[[ingest.lookback]]
name = "All"

[view]
# Parallel batches for query evaluation and statistics
batches = 16

# Entries per search index batch
search_batch_size = 4096

[storage]
# SQLite database holding saved queries
saved_queries_path = "~/.local/share/logscope/queries.db"

[logging]
# Log level: trace, debug, info, warn, error
level = "warn"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
