//! Configuration for codesync.
//!
//! [`Config`] holds the tunables shared by both sides of a session. It is
//! persisted as TOML, by default at `~/.config/codesync/config.toml` on Unix
//! systems. Missing keys fall back to their defaults, so an empty file is a
//! valid config.
//!
//! # Example
//!
//! ```ignore
//! use codesync_core::config::Config;
//!
//! let config = Config::load()?;
//! let window = config.debounce();
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::crdt::{DEFAULT_TEXT_NAME, ResourceId};
use crate::error::{Result, SyncError};

/// User-tunable settings for hosts and remote surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Quiet period after the last keystroke before an edit is diffed and sent
    pub debounce_ms: u64,

    /// Name of the shared text inside each replicated document.
    /// Both peers must agree on it.
    pub text_name: String,

    /// How often the command-line host polls the watched file for changes
    pub poll_interval_ms: u64,

    /// Resource kind used for plain paths given on the command line
    pub default_kind: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            text_name: DEFAULT_TEXT_NAME.to_string(),
            poll_interval_ms: 250,
            default_kind: "code".to_string(),
        }
    }
}

impl Config {
    /// Debounce window as a duration.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// File polling interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Build a resource identifier for `path` using the configured default kind.
    pub fn resource_for(&self, path: impl Into<String>) -> Option<ResourceId> {
        ResourceId::from_kind(&self.default_kind, path)
    }

    /// Load config from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| SyncError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load config from a specific file, or return the default if it doesn't exist.
    pub fn load_from_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a specific file, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|source| SyncError::FileWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Config {
    /// Get the config file path (~/.config/codesync/config.toml)
    /// Only available on native platforms
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("codesync").join("config.toml"))
    }

    /// Load config from default location, or return default if file doesn't exist
    /// Only available on native platforms
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from_or_default(&path),
            None => Ok(Self::default()),
        }
    }

    /// Save config to default location
    /// Only available on native platforms
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or(SyncError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Write the default config to the default location and return it
    pub fn init() -> Result<Self> {
        let config = Self::default();
        config.save()?;
        Ok(config)
    }
}
