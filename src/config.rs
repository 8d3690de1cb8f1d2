//! Configuration for the segment store and loader
//!
//! TOML file support with per-field defaults and environment variable
//! overrides:
//!
//! | Variable                       | Field                            |
//! |--------------------------------|----------------------------------|
//! | `OLAP_STORE_CAPACITY_HINT`     | `store.capacity_hint`            |
//! | `OLAP_WAIT_TIMEOUT_MS`         | `store.wait_timeout_ms`          |
//! | `OLAP_MAX_MEASURES_PER_QUERY`  | `loader.max_measures_per_query`  |
//! | `RUST_LOG`                     | `logging.level`                  |

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Single-flight store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Segment loader settings
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Logging settings (applied by the binary)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Single-flight store configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Initial number of entries to allocate for; not a bound
    #[serde(default = "default_capacity_hint")]
    pub capacity_hint: usize,

    /// Longest a loader waits on a segment another caller is loading;
    /// unset means wait indefinitely
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
}

/// Segment loader configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoaderConfig {
    /// Maximum measures batched into one statement
    #[serde(default = "default_max_measures_per_query")]
    pub max_measures_per_query: usize,

    /// Load rollups with GROUPING SETS in one statement instead of one
    /// statement per grouping set
    #[serde(default = "default_true")]
    pub use_grouping_sets: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Full event format with targets and thread ids; `false` selects
    /// compact single-line output
    #[serde(default = "default_true")]
    pub structured: bool,
}

fn default_capacity_hint() -> usize { 1024 }
fn default_max_measures_per_query() -> usize { 64 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity_hint: default_capacity_hint(),
            wait_timeout_ms: None,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_measures_per_query: default_max_measures_per_query(),
            use_grouping_sets: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            structured: true,
        }
    }
}

impl StoreConfig {
    /// Wait bound as a duration
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source
    ///
    /// Unparseable numeric values are ignored and logged.
    pub fn apply_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Store
        if let Some(raw) = lookup("OLAP_STORE_CAPACITY_HINT") {
            match raw.parse() {
                Ok(v) => self.store.capacity_hint = v,
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid OLAP_STORE_CAPACITY_HINT"),
            }
        }
        if let Some(raw) = lookup("OLAP_WAIT_TIMEOUT_MS") {
            match raw.parse() {
                Ok(v) => self.store.wait_timeout_ms = Some(v),
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid OLAP_WAIT_TIMEOUT_MS"),
            }
        }

        // Loader
        if let Some(raw) = lookup("OLAP_MAX_MEASURES_PER_QUERY") {
            match raw.parse() {
                Ok(v) => self.loader.max_measures_per_query = v,
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid OLAP_MAX_MEASURES_PER_QUERY"),
            }
        }

        // Logging
        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.store.capacity_hint == 0 {
            return Err(Error::Configuration("Store capacity hint must be > 0".to_string()));
        }
        if self.store.wait_timeout_ms == Some(0) {
            return Err(Error::Configuration(
                "Wait timeout must be > 0 when set".to_string(),
            ));
        }
        if self.loader.max_measures_per_query == 0 {
            return Err(Error::Configuration(
                "Max measures per query must be > 0".to_string(),
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(Error::Configuration("Log level cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }
}
