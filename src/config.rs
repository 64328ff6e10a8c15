//! Configuration management for the config store
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (remote-config.toml)
//! - Environment variables (REMOTE_CONFIG__*)
//!
//! ## Example config file (remote-config.toml):
//! ```toml
//! [store]
//! path = "./data/configs.db"
//! busy_timeout_ms = 5000
//! max_idle_connections = 5
//! max_append_attempts = 5
//! wal = true
//!
//! [logging]
//! filter = "info"
//! ansi = true
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// How long a connection waits on a locked database
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Idle connections kept open for reuse
    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: usize,

    /// Attempts at an append before a write conflict is reported
    #[serde(default = "default_max_append_attempts")]
    pub max_append_attempts: u32,

    /// Use write-ahead logging
    #[serde(default = "default_true")]
    pub wal: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives, used when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Colored output
    #[serde(default = "default_true")]
    pub ansi: bool,
}

// Default value functions
fn default_store_path() -> PathBuf {
    PathBuf::from("./data/configs.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_max_idle_connections() -> usize {
    5
}

fn default_max_append_attempts() -> u32 {
    5
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_idle_connections: default_max_idle_connections(),
            max_append_attempts: default_max_append_attempts(),
            wal: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            ansi: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default locations, layering `config_path` on top
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = [
            "remote-config.toml",
            ".remote-config.toml",
            "config/remote-config.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(dirs) = directories::ProjectDirs::from("dev", "familiar", "remote-config") {
            let xdg_config = dirs.config_dir().join("remote-config.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (REMOTE_CONFIG__STORE__PATH, ...)
        builder = builder.add_source(
            Environment::with_prefix("REMOTE_CONFIG")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get the store path (resolves relative paths)
    pub fn store_path(&self) -> PathBuf {
        if self.store.path.is_absolute() {
            self.store.path.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.store.path)
        }
    }
}
