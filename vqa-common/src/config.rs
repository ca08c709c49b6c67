//! Bootstrap configuration loading
//!
//! Two-tier configuration:
//! 1. **TOML bootstrap**: database path, listen address, logging. Read once at
//!    startup.
//! 2. **Database runtime**: policy thresholds in the `settings` table, loaded
//!    by the service (see `vqa_review::config`).
//!
//! Config file resolution order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`~/.config/vqa/config.toml`)
//! 4. Built-in defaults (no file)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "VQA_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    ///
    /// Defaults to the OS data directory when omitted.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Listen address for the HTTP surface
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            bind_address: default_bind_address(),
            port: default_port(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5790
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Resolve and load the bootstrap configuration
    ///
    /// A file named explicitly (CLI or environment) must exist; the per-user
    /// file is optional.
    pub fn load(cli_arg: Option<&Path>, env_var_name: &str) -> Result<Self> {
        match resolve_config_path(cli_arg, env_var_name) {
            ConfigSource::Explicit(path) => load_toml_config(&path),
            ConfigSource::UserFile(path) => {
                if path.exists() {
                    load_toml_config(&path)
                } else {
                    Ok(Self::default())
                }
            }
            ConfigSource::Defaults => Ok(Self::default()),
        }
    }

    /// Database path, falling back to the OS data directory
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// Where the bootstrap configuration comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Named on the command line or in the environment
    Explicit(PathBuf),
    /// Conventional per-user location
    UserFile(PathBuf),
    /// No file, built-in defaults
    Defaults,
}

/// Resolve the config file location following the priority order above
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> ConfigSource {
    if let Some(path) = cli_arg {
        return ConfigSource::Explicit(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return ConfigSource::Explicit(PathBuf::from(path));
        }
    }

    match dirs::config_dir() {
        Some(dir) => ConfigSource::UserFile(dir.join("vqa").join("config.toml")),
        None => ConfigSource::Defaults,
    }
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    toml::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Write a TOML config file, creating parent directories
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Get OS-dependent default database path
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("vqa").join("vqa.db"))
        .unwrap_or_else(|| PathBuf::from("./vqa_data/vqa.db"))
}
