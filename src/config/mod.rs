//! Configuration management for PasteBridge
//!
//! This module handles loading, validating, and managing configuration
//! for the paste synchronization core.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity of this device within the account group
    #[serde(default)]
    pub device: DeviceConfig,

    /// Synchronization tuning
    #[serde(default)]
    pub sync: SyncConfig,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Identity of the local device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Stable identifier of this device (generated if not specified)
    #[serde(default = "generate_device_id")]
    pub device_id: String,

    /// Human-readable device name
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Logical account this device belongs to
    #[serde(default = "default_account")]
    pub account: String,
}

/// Synchronization tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How long a paste caller waits for an in-flight remote fetch, in ms.
    /// Trades perceived paste latency against false timeouts on slow links.
    #[serde(default = "default_await_timeout_ms")]
    pub await_timeout_ms: u64,

    /// How many top events to request when resolving the current one
    #[serde(default = "default_top_events")]
    pub top_events: usize,

    /// Lifetime of a locally published event, in ms
    #[serde(default = "default_event_ttl_ms")]
    pub event_ttl_ms: i64,

    /// Maximum payload size in bytes
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
}

impl SyncConfig {
    /// Await timeout as a [`Duration`]
    pub fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }
}

// Default value functions
fn generate_device_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_device_name() -> String {
    let hostname = gethostname::gethostname().to_string_lossy().to_string();
    format!("{}-pastebridge", hostname)
}

fn default_account() -> String {
    "default".to_string()
}

fn default_await_timeout_ms() -> u64 {
    8_000
}

fn default_top_events() -> usize {
    1
}

fn default_event_ttl_ms() -> i64 {
    120_000 // 2 minutes
}

fn default_max_payload() -> usize {
    crate::MAX_PAYLOAD_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: generate_device_id(),
            device_name: default_device_name(),
            account: default_account(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            await_timeout_ms: default_await_timeout_ms(),
            top_events: default_top_events(),
            event_ttl_ms: default_event_ttl_ms(),
            max_payload: default_max_payload(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            sync: SyncConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Checks in order:
    /// 1. Path from PASTEBRIDGE_CONFIG environment variable
    /// 2. ~/.config/pastebridge/config.toml
    /// 3. Falls back to defaults if none exists
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_path() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate_config()?;
        Ok(config)
    }

    /// Default configuration file location, whether or not it exists yet
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pastebridge").join("config.toml"))
    }

    /// Find configuration file path
    fn find_config_path() -> Option<PathBuf> {
        // Check environment variable first
        if let Ok(path) = std::env::var("PASTEBRIDGE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        Self::default_path().filter(|p| p.exists())
    }

    /// Validate configuration values
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        if self.device.device_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "device_id must not be empty".to_string(),
            ));
        }
        if self.device.account.trim().is_empty() {
            return Err(ConfigError::Validation(
                "account must not be empty".to_string(),
            ));
        }

        // Await timeout range (500ms to 60s)
        if self.sync.await_timeout_ms < 500 {
            return Err(ConfigError::Validation(
                "await_timeout_ms must be at least 500".to_string(),
            ));
        }
        if self.sync.await_timeout_ms > 60_000 {
            return Err(ConfigError::Validation(
                "await_timeout_ms must not exceed 60000".to_string(),
            ));
        }

        if self.sync.top_events < 1 {
            return Err(ConfigError::Validation(
                "top_events must be at least 1".to_string(),
            ));
        }

        if self.sync.event_ttl_ms < 1_000 {
            return Err(ConfigError::Validation(
                "event_ttl_ms must be at least 1000".to_string(),
            ));
        }

        // Payload range (1KB to 50MB)
        if self.sync.max_payload < 1024 {
            return Err(ConfigError::Validation(
                "max_payload must be at least 1024 bytes (1KB)".to_string(),
            ));
        }
        if self.sync.max_payload > 52_428_800 {
            return Err(ConfigError::Validation(
                "max_payload must not exceed 52428800 bytes (50MB)".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| {
                ConfigError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not find config directory",
                ))
            })?
            .join("pastebridge");

        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        self.save_to_path(&config_path)?;
        Ok(config_path)
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            ConfigError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Validate configuration file at given path
    pub fn validate(path: &Path) -> Result<(), ConfigError> {
        Self::load_from_path(path).map(|_| ())
    }
}
