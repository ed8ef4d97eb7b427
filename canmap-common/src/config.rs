//! Configuration loading and config-file resolution
//!
//! Config file resolution order:
//! 1. Command-line argument (highest priority)
//! 2. `CANMAP_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/canmap/config.toml`)
//! 4. Built-in defaults (no file)
//!
//! `CANMAP_BACKEND_URL` overrides the backend URL from any source.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CANMAP_CONFIG";

/// Environment variable overriding `backend_url`
pub const BACKEND_URL_ENV_VAR: &str = "CANMAP_BACKEND_URL";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanmapConfig {
    /// Base URL of the mapping backend
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Per-request timeout for backend calls
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Mapping-job polling cadence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between status queries
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Status queries before the job is reported as timed out
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CanmapConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            request_timeout_ms: default_request_timeout_ms(),
            poll: PollConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl CanmapConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parse TOML text and validate
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CanmapConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file path
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Resolve, load and apply environment overrides
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                debug!("No config file found, using built-in defaults");
                Self::default()
            }
        };

        if let Ok(url) = std::env::var(BACKEND_URL_ENV_VAR) {
            if !url.trim().is_empty() {
                debug!(backend_url = %url, "Backend URL overridden from environment");
                config.backend_url = url;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend_url.trim().is_empty() {
            return Err(Error::Config("backend_url must not be empty".to_string()));
        }
        if self.poll.interval_ms == 0 {
            return Err(Error::Config("poll.interval_ms must be greater than zero".to_string()));
        }
        if self.poll.max_attempts == 0 {
            return Err(Error::Config("poll.max_attempts must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Config file to load, if any.
///
/// An explicit CLI path is returned even if it does not exist so that the
/// caller reports the read failure instead of silently using defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("canmap").join("config.toml"))
        .filter(|p| p.exists())
}
