//! Configuration module for tagcomms-rs
//!
//! [`EngineConfig`] holds the tunables of the engine: protocol timeouts, the
//! scheduler's startup grace period, the bootstrap watchdog interval, the
//! notification channel capacity and the initial state of the three runtime
//! gates. Every field has a default, so a config file only needs to list
//! what it overrides.
//!
//! # File formats
//!
//! Files ending in `.json` are read and written as JSON; anything else is
//! treated as TOML.
//!
//! # Config Location
//!
//! [`default_config_path`] resolves to the platform config directory:
//! - **Linux**: `~/.config/tagcomms-rs/config.toml`
//! - **macOS**: `~/Library/Application Support/tagcomms-rs/config.toml`
//! - **Windows**: `%APPDATA%\tagcomms-rs\config.toml`
//!
//! # Example
//!
//! ```ignore
//! use tagcomms_rs::config::EngineConfig;
//!
//! let config = EngineConfig::load_or_default("tagcomms.toml");
//! assert_eq!(config.timeout_ms, 5000);
//! ```

use crate::error::{CommsError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "tagcomms-rs";

/// Config filename inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

/// Default bound on every blocking protocol call, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default delay before "group initialized" notifications may fire
pub const DEFAULT_STARTUP_GRACE_MS: u64 = 1000;

/// Default retry interval of the bootstrap watchdog
pub const DEFAULT_WATCHDOG_INTERVAL_MS: u64 = 500;

/// Default capacity of the notification channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Path of the per-user config file, if the platform has a config directory
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_startup_grace_ms() -> u64 {
    DEFAULT_STARTUP_GRACE_MS
}

fn default_watchdog_interval_ms() -> u64 {
    DEFAULT_WATCHDOG_INTERVAL_MS
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_true() -> bool {
    true
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bound on each create/read/write call to a protocol library
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Time after the first active tick before groups may report
    /// themselves initialized
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,

    /// How often the watchdog retries attaching to the host tick source
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,

    /// Capacity of the notification channel; overflow is counted and dropped
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Initial state of the log gate
    #[serde(default = "default_true")]
    pub logging_enabled: bool,

    /// Initial state of the comms gate
    #[serde(default)]
    pub comms_enabled: bool,

    /// Initial state of the simulation gate
    #[serde(default)]
    pub simulation_running: bool,

    /// Directory for daily rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            startup_grace_ms: DEFAULT_STARTUP_GRACE_MS,
            watchdog_interval_ms: DEFAULT_WATCHDOG_INTERVAL_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            logging_enabled: true,
            comms_enabled: false,
            simulation_running: false,
            log_dir: None,
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

impl EngineConfig {
    /// Protocol call timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Watchdog retry interval
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(CommsError::Config(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if self.watchdog_interval_ms == 0 {
            return Err(CommsError::Config(
                "watchdog_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a config file (TOML, or JSON by extension)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(CommsError::from)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content).map_err(|e| {
                CommsError::Serialization(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                CommsError::Serialization(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning defaults if it is missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save to disk, creating the parent directory if needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CommsError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| CommsError::Serialization(format!("Failed to serialize config: {}", e)))?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| CommsError::Serialization(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content).map_err(|e| {
            CommsError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}
