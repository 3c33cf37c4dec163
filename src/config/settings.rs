//! Server configuration settings
//!
//! Layered configuration: defaults → config file → environment variables → CLI args

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};

/// Environment variable prefix (`PREVIEW_PORT`, `PREVIEW_RETENTION_SECS`, ...)
pub const ENV_PREFIX: &str = "PREVIEW_";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Origins allowed to call the API cross-origin
    pub allowed_origins: Vec<String>,

    /// Maximum session age in seconds before the reaper evicts it
    pub retention_secs: u64,

    /// Seconds between reaper sweeps
    pub sweep_interval_secs: u64,

    /// Root directory for project workspaces
    pub workspaces_dir: Option<PathBuf>,

    /// Delete a session's workspace when it is evicted
    pub cleanup_workspaces: bool,

    /// Host headers a preview accepts; empty accepts any host
    pub allowed_hosts: Vec<String>,

    /// Inject the live-reload client into served HTML and expose `/live/:id`
    pub live_reload: bool,

    /// Maximum accepted request body size in bytes
    pub max_body_bytes: usize,

    /// Enable debug logging
    pub debug: bool,

    /// Log file path (if set, logs to file instead of stderr)
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            retention_secs: 30 * 60,
            sweep_interval_secs: 30 * 60,
            workspaces_dir: None,
            cleanup_workspaces: true,
            allowed_hosts: Vec::new(),
            live_reload: true,
            max_body_bytes: 50 * 1024 * 1024,
            debug: false,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration using a specific config file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config: Config = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Config::default()))
            // Layer config file if it exists
            .merge(Toml::file(config_path))
            // Layer environment variables (PREVIEW_PORT, etc.)
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sweep_interval_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_body_bytes".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| {
                ConfigError::InvalidValue {
                    key: "host".to_string(),
                    reason: e.to_string(),
                }
                .into()
            })
    }

    /// Get the workspaces directory path
    pub fn workspaces_dir(&self) -> PathBuf {
        self.workspaces_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("preview-sandbox"))
    }

    /// Retention threshold as a duration
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Reaper sweep interval as a duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Ensure the workspaces directory exists
    pub fn ensure_directories(&self) -> Result<()> {
        let workspaces_dir = self.workspaces_dir();
        std::fs::create_dir_all(&workspaces_dir)
            .map_err(|_| Error::Config(ConfigError::DirectoryCreationFailed(workspaces_dir)))?;
        Ok(())
    }

    /// Save current configuration to a specific file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|_e| {
                Error::Config(ConfigError::DirectoryCreationFailed(parent.to_path_buf()))
            })?;
        }

        let toml =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        std::fs::write(config_path, toml).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "preview-sandbox", "preview-sandbox").ok_or_else(|| {
            Error::Config(ConfigError::LoadFailed(
                "Could not determine home directory".to_string(),
            ))
        })
    }
}
