//! Configuration System
//!
//! Handles loading configuration from TOML files. Only the logging filter
//! looks at the environment (`RUST_LOG`); store behaviour is configured
//! from the file alone.

use crate::storage::StoreConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub index: IndexSection,

    #[serde(default)]
    pub query: QuerySection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log location configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Separate directory for index files
    #[serde(default)]
    pub index_dir: Option<String>,

    #[serde(default = "default_suffix")]
    pub suffix: String,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("shapelog").to_string_lossy().to_string())
        .unwrap_or_else(|| "./shapelog_data".to_string())
}

fn default_suffix() -> String {
    "shapes".to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            index_dir: None,
            suffix: default_suffix(),
        }
    }
}

/// Index maintenance configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexSection {
    #[serde(default = "default_max_scan_passes")]
    pub max_scan_passes: u32,
}

fn default_max_scan_passes() -> u32 {
    crate::index::DEFAULT_MAX_SCAN_PASSES
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            max_scan_passes: default_max_scan_passes(),
        }
    }
}

/// Query defaults
#[derive(Debug, Clone, Deserialize)]
pub struct QuerySection {
    #[serde(default = "default_midnight_fallback_hours")]
    pub midnight_fallback_hours: u32,

    #[serde(default = "default_window_secs")]
    pub default_window_secs: i64,

    #[serde(default = "default_lead_tolerance_secs")]
    pub default_lead_tolerance_secs: i64,
}

fn default_midnight_fallback_hours() -> u32 {
    crate::query::DEFAULT_MIDNIGHT_FALLBACK_HOURS
}

fn default_window_secs() -> i64 {
    crate::query::DEFAULT_WINDOW_SECS
}

fn default_lead_tolerance_secs() -> i64 {
    crate::query::DEFAULT_LEAD_TOLERANCE_SECS
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            midnight_fallback_hours: default_midnight_fallback_hours(),
            default_window_secs: default_window_secs(),
            default_lead_tolerance_secs: default_lead_tolerance_secs(),
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
    "info".to_string()
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

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Locations searched by [`Config::load_default`], in order
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(2);
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("shapelog").join("config.toml"));
        }
        paths.push(PathBuf::from("./shapelog.toml"));
        paths
    }

    /// Load from default locations, falling back to built-in defaults
    ///
    /// Nothing is logged here: this runs before logging is set up, so the
    /// outcome comes back as a [`LoadReport`] for the caller to log.
    pub fn load_default() -> (Self, LoadReport) {
        Self::load_first(&Self::default_paths())
    }

    /// Load the first of `paths` that exists and parses
    pub fn load_first(paths: &[PathBuf]) -> (Self, LoadReport) {
        let mut report = LoadReport::default();

        for path in paths.iter().filter(|p| p.exists()) {
            match Self::load(path) {
                Ok(config) => {
                    report.source = Some(path.clone());
                    return (config, report);
                }
                Err(e) => report.skipped.push(e),
            }
        }

        (Self::default(), report)
    }

    /// Settings for opening a [`crate::storage::ShapeStore`]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            data_dir: PathBuf::from(&self.store.data_dir),
            index_dir: self.store.index_dir.as_ref().map(PathBuf::from),
            suffix: self.store.suffix.clone(),
            max_scan_passes: self.index.max_scan_passes,
            midnight_fallback_hours: self.query.midnight_fallback_hours,
        }
    }
}

/// How a configuration was arrived at
#[derive(Debug, Default)]
pub struct LoadReport {
    /// File the configuration came from; built-in defaults when `None`
    pub source: Option<PathBuf>,
    /// Files that exist but could not be loaded
    pub skipped: Vec<ConfigError>,
}

impl LoadReport {
    pub fn from_file(path: &Path) -> Self {
        Self {
            source: Some(path.to_path_buf()),
            skipped: Vec::new(),
        }
    }

    /// Emit the outcome once a subscriber is installed
    pub fn log(&self) {
        for error in &self.skipped {
            tracing::warn!("Skipped config file: {}", error);
        }
        match &self.source {
            Some(path) => tracing::info!("Loaded config from {:?}", path),
            None => tracing::info!("Using default config"),
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
///
/// `data_dir` is the platform default, spelled out: TOML has no `~`.
pub fn generate_default_config() -> String {
    let data_dir = toml::Value::String(default_data_dir());
    format!(
        r#"# shapelog configuration
#
# Log verbosity can also be set with RUST_LOG.

[store]
# Directory holding the per-day logs ({{YYYYMMDD}}.{{suffix}})
data_dir = {data_dir}

# Directory for index files; defaults to data_dir
# index_dir = "/var/cache/shapelog"

# File name suffix of the log series
suffix = "shapes"

[index]
# Scan passes allowed while a log keeps growing during a rebuild
max_scan_passes = 5

[query]
# An empty result this many hours after midnight also searches the previous day
midnight_fallback_hours = 3

# Window half-width used when a query does not give one (seconds)
default_window_secs = 3600

# Lead time tolerance used when a query does not give one (seconds)
default_lead_tolerance_secs = 300

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    )
}
