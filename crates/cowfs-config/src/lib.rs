//! # cowfs-config
//!
//! Configuration management for cowfs.
//!
//! Loads configuration from:
//! 1. `~/.cowfs/config.toml` (global)
//! 2. `.cowfs/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

pub use logging::{init_logging, LogLevel};

/// Default storage root when nothing else is configured
pub const DEFAULT_ROOT: &str = "cow_filesystem";

/// Name of the block directory under the storage root
pub const BLOCKS_DIR: &str = "data";

/// Name of the metadata directory under the storage root
pub const METADATA_DIR: &str = "metadata";

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config (~/.cowfs/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(&global_path)?;
            }
        }

        // 2. Project config (.cowfs/config.toml) overrides global
        let project_path = Path::new(".cowfs/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let contents = std::fs::read_to_string(project_path)?;
            config.merge_toml(&contents)?;
        }

        // 3. Environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse a single config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.cowfs/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".cowfs/config.toml"))
    }

    /// Overlay the keys present in `contents` onto this config.
    ///
    /// Only keys the overriding document actually sets are replaced, so a
    /// project file naming one key leaves the rest of the global config alone.
    pub fn merge_toml(&mut self, contents: &str) -> Result<(), ConfigError> {
        let overlay: ConfigOverlay = toml::from_str(contents)?;
        if let Some(storage) = overlay.storage {
            if let Some(root) = storage.root {
                self.storage.root = root;
            }
        }
        if let Some(engine) = overlay.engine {
            if let Some(v) = engine.read_requires_session {
                self.engine.read_requires_session = v;
            }
        }
        if let Some(log) = overlay.log {
            if let Some(level) = log.level {
                self.log.level = level;
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("COWFS_ROOT") {
            self.storage.root = PathBuf::from(path);
        }
        if let Ok(v) = std::env::var("COWFS_READ_REQUIRES_SESSION") {
            if let Some(b) = parse_bool(&v) {
                self.engine.read_requires_session = b;
            }
        }
    }

    /// Block directory under the storage root
    pub fn blocks_dir(&self) -> PathBuf {
        self.storage.root.join(BLOCKS_DIR)
    }

    /// Metadata directory under the storage root
    pub fn metadata_dir(&self) -> PathBuf {
        self.storage.root.join(METADATA_DIR)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        Config::default().to_toml()
    }

    /// Serialize this config as a TOML document
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root holding `data/` (blocks) and `metadata/`
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
        }
    }
}

/// Engine behaviour switches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reads fail with NotOpen unless the file has an open session
    pub read_requires_session: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_requires_session: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl LogConfig {
    pub fn level(&self) -> LogLevel {
        self.level.parse().unwrap_or(LogLevel::Warn)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverlay {
    storage: Option<StorageOverlay>,
    engine: Option<EngineOverlay>,
    log: Option<LogOverlay>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageOverlay {
    root: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct EngineOverlay {
    read_requires_session: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LogOverlay {
    level: Option<String>,
}
