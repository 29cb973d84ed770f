//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\tunesync\config.toml
//! - macOS: ~/Library/Application Support/tunesync/config.toml
//! - Linux: ~/.config/tunesync/config.toml
//!
//! The same directory holds the default database and cover directory.
//! Paths in the file may start with `~` or `$HOME`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scanner::WatchSettings;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the music lives and where catalog data goes
    pub library: LibraryConfig,

    /// Full scan tuning
    pub scan: ScanConfig,

    /// Live watcher tuning
    pub watch: WatchConfig,
}

/// Library locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Root of the music tree
    pub music_path: PathBuf,

    /// Directory for materialized covers (default: `<config dir>/covers`)
    pub cover_dir: Option<PathBuf>,

    /// SQLite database file (default: `<config dir>/tunesync.db`)
    pub database: Option<PathBuf>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            music_path: dirs::audio_dir().unwrap_or_else(|| PathBuf::from("~/Music")),
            cover_dir: None,
            database: None,
        }
    }
}

impl LibraryConfig {
    /// Music root with `~`/`$HOME` expanded.
    pub fn music_root(&self) -> PathBuf {
        expand_home(&self.music_path)
    }

    pub fn cover_dir(&self) -> PathBuf {
        match &self.cover_dir {
            Some(dir) => expand_home(dir),
            None => data_dir().join("covers"),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.database {
            Some(path) => expand_home(path),
            None => data_dir().join(crate::db::DEFAULT_DB_NAME),
        }
    }
}

/// What a full scan does when one file can't be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Abort the scan on the first unreadable file
    #[default]
    FailFast,
    /// Report the file as skipped and keep going
    Skip,
}

/// Full scan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Files persisted per batch
    pub batch_size: usize,

    /// Maximum extractions in flight across the whole scan
    pub concurrency: usize,

    /// Extraction failure handling
    pub on_error: ErrorPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency: 50,
            on_error: ErrorPolicy::FailFast,
        }
    }
}

/// Live watcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Whether `watch` should be started alongside the library
    pub enabled: bool,

    /// Quiet period after the last event for a path
    pub debounce_ms: u64,

    /// Size poll interval while waiting for a write to finish
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 1000,
            poll_interval_ms: 1000,
        }
    }
}

impl WatchConfig {
    pub fn settings(&self) -> WatchSettings {
        WatchSettings {
            debounce: Duration::from_millis(self.debounce_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

impl Config {
    /// Reject settings the engine can't run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.scan.batch_size == 0 {
            return Err(crate::error::Error::config("scan.batch_size must be at least 1"));
        }
        if self.scan.concurrency == 0 {
            return Err(crate::error::Error::config("scan.concurrency must be at least 1"));
        }
        Ok(())
    }
}

/// Replace a leading `~` or `$HOME` with the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Some(home) = dirs::home_dir() else {
        return path.to_path_buf();
    };
    let Some(text) = path.to_str() else {
        return path.to_path_buf();
    };

    for prefix in ["~", "$HOME"] {
        if text == prefix {
            return home;
        }
        if let Some(rest) = text.strip_prefix(prefix)
            && let Some(rest) = rest.strip_prefix(['/', '\\'])
        {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tunesync"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

fn data_dir() -> PathBuf {
    config_dir().unwrap_or_else(|| PathBuf::from(".tunesync"))
}

/// Load configuration from the default location.
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };
    load_from(&path)
}

/// Load configuration from a specific file, falling back to defaults.
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to the default location.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &path)
}

/// Save configuration to `path`, creating its directory if needed.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================
