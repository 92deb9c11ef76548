//! Configuration management for Sift.
//!
//! This module provides configuration loading, saving, and defaults.
//! Configuration is stored in TOML format in a platform-appropriate location.

use crate::error::{Result, SiftError};
use crate::tokenizer::WordTokenizer;
use directories::ProjectDirs;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main configuration structure for Sift.
///
/// ## Example Configuration File (sift.toml)
///
/// ```toml
/// [general]
/// log_level = "info"
///
/// [index]
/// lowercase_terms = true
/// max_term_length = 64
/// max_file_size = 10485760
///
/// [monitor]
/// poll_interval_ms = 1000
/// native_events = true
///
/// [exclude]
/// patterns = [".git", "*.swp", "target"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Tokenization and indexing
    pub index: IndexConfig,

    /// Change monitoring
    pub monitor: MonitorConfig,

    /// Entry name exclusions
    pub exclude: ExcludeConfig,
}

/// General configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            log_level: "info".to_string(),
        }
    }
}

/// Index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Fold terms to lowercase
    pub lowercase_terms: bool,

    /// Longer words are not indexed
    pub max_term_length: usize,

    /// Files larger than this many bytes are not read (None = no limit)
    pub max_file_size: Option<u64>,

    /// Batch size at which tokenization runs in parallel
    pub parallel_threshold: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            lowercase_terms: false,
            max_term_length: 255,
            max_file_size: None,
            parallel_threshold: crate::index::DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between full snapshot diffs
    pub poll_interval_ms: u64,

    /// Use OS change notifications to react faster than the poll interval
    pub native_events: bool,

    /// How long to wait for a new monitor to finish its initial snapshot
    pub ready_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            poll_interval_ms: 1000,
            native_events: true,
            ready_timeout_ms: 30_000,
        }
    }
}

impl MonitorConfig {
    /// Poll interval as a duration (at least 1ms)
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Ready timeout as a duration
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Exclusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcludeConfig {
    /// Glob patterns matched against entry names (not full paths)
    pub patterns: Vec<String>,
}

impl Default for ExcludeConfig {
    fn default() -> Self {
        ExcludeConfig {
            patterns: vec![".git".to_string()],
        }
    }
}

/// Compiled exclusion patterns.
#[derive(Debug, Clone, Default)]
pub struct ExcludeFilter {
    patterns: Vec<Pattern>,
}

impl ExcludeFilter {
    /// Compile glob patterns into a filter
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p.as_ref()).map_err(|e| SiftError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ExcludeFilter { patterns })
    }

    /// A filter that excludes nothing
    pub fn none() -> Self {
        Self::default()
    }

    /// Check if an entry with this name should be skipped
    pub fn is_excluded(&self, name: &OsStr) -> bool {
        let name = name.to_string_lossy();
        self.patterns.iter().any(|p| p.matches(&name))
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default config if no config file exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Config::default());
        }

        info!(path = %path.display(), "Loading configuration");
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents).map_err(|e| SiftError::ConfigError {
            reason: format!("Failed to parse config: {}", e),
        })?;

        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Saving configuration");
        let contents = toml::to_string_pretty(self).map_err(|e| SiftError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "sift").ok_or_else(|| SiftError::ConfigError {
            reason: "Could not determine config directory".to_string(),
        })?;

        Ok(dirs.config_dir().join("sift.toml"))
    }

    /// Build the tokenizer described by the `[index]` section.
    pub fn tokenizer(&self) -> WordTokenizer {
        WordTokenizer {
            lowercase: self.index.lowercase_terms,
            max_term_length: self.index.max_term_length,
        }
    }

    /// Compile the `[exclude]` patterns.
    pub fn exclude_filter(&self) -> Result<ExcludeFilter> {
        ExcludeFilter::new(&self.exclude.patterns)
    }

    /// Build a log filter from `RUST_LOG`, falling back to `general.log_level`.
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.general.log_level))
    }
}
