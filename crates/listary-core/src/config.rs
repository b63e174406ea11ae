//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/listary/config.toml)
//! 3. Environment variables (LISTARY_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "LISTARY";

/// Default delay used to coalesce remote change notifications
pub const DEFAULT_REFETCH_DEBOUNCE_MS: u64 = 100;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Directory for data storage (local keys, remote database)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Remote database file; defaults to `<data_dir>/remote.db`
    #[serde(default)]
    pub remote_db: Option<PathBuf>,

    /// Signed-in account; unset means local mode
    #[serde(default)]
    pub user_id: Option<String>,

    /// Milliseconds to wait for more change notifications before refetching
    #[serde(default = "default_refetch_debounce_ms")]
    pub refetch_debounce_ms: u64,

    /// Write logs to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            remote_db: None,
            user_id: None,
            refetch_debounce_ms: DEFAULT_REFETCH_DEBOUNCE_MS,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (LISTARY_DATA_DIR, LISTARY_REMOTE_DB,
    ///    LISTARY_USER, LISTARY_REFETCH_DEBOUNCE_MS)
    /// 2. Config file (~/.config/listary/config.toml or LISTARY_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_REMOTE_DB", ENV_PREFIX)) {
            self.remote_db = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        // Empty string signs out
        if let Ok(val) = std::env::var(format!("{}_USER", ENV_PREFIX)) {
            self.user_id = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_REFETCH_DEBOUNCE_MS", ENV_PREFIX)) {
            match val.parse() {
                Ok(ms) => self.refetch_debounce_ms = ms,
                Err(_) => tracing::warn!(
                    "Ignoring invalid {}_REFETCH_DEBOUNCE_MS: {:?}",
                    ENV_PREFIX,
                    val
                ),
            }
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Set a single key from its textual value
    ///
    /// An empty value clears optional keys.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let optional_path = |value: &str| {
            if value.is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            }
        };

        match key {
            "data_dir" => {
                if value.is_empty() {
                    bail!("data_dir cannot be empty");
                }
                self.data_dir = PathBuf::from(value);
            }
            "remote_db" => self.remote_db = optional_path(value),
            "user_id" => {
                self.user_id = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "refetch_debounce_ms" => {
                self.refetch_debounce_ms = value
                    .parse()
                    .with_context(|| format!("Invalid refetch_debounce_ms: {:?}", value))?;
            }
            "log_file" => self.log_file = optional_path(value),
            _ => bail!(
                "Unknown config key: {}. Valid keys: data_dir, remote_db, user_id, refetch_debounce_ms, log_file",
                key
            ),
        }
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with LISTARY_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("listary")
            .join("config.toml")
    }

    /// Directory holding the local-mode keys
    pub fn local_dir(&self) -> PathBuf {
        self.data_dir.join("local")
    }

    /// Path to the remote store database
    pub fn remote_db_path(&self) -> PathBuf {
        self.remote_db
            .clone()
            .unwrap_or_else(|| self.data_dir.join("remote.db"))
    }

    pub fn refetch_debounce(&self) -> Duration {
        Duration::from_millis(self.refetch_debounce_ms)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("listary")
}

fn default_refetch_debounce_ms() -> u64 {
    DEFAULT_REFETCH_DEBOUNCE_MS
}
