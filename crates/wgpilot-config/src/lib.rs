#![deny(unsafe_code)]

//! Configuration loading, validation, and path resolution for wgpilot.
//!
//! Loads the daemon's TOML configuration file and validates it. Provides the
//! [`AppConfig`] type as the central configuration structure, and the
//! [`locator`] module which turns the administrator overrides into the
//! ordered tunnel search path and the state-tool location.

/// Tunnel configuration directory and state-tool resolution.
pub mod locator;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

pub use locator::ConfigLocator;

/// Default location of the daemon configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/wgpilot/wgpilot.toml";

/// Upper bound for `daemon.min_uptime_secs` (one day).
pub const MAX_MIN_UPTIME_SECS: u64 = 24 * 60 * 60;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon configuration.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Administrator overrides for a non-default installation.
    #[serde(default)]
    pub overrides: OverrideConfig,
}

/// Configuration for the core daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket the IPC server binds.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Highest-precedence tunnel configuration directory.
    #[serde(default = "default_config_dir")]
    pub config_dir: String,

    /// Directory where the state tool writes `<name>.name` interface markers.
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: String,

    /// Minimum time the daemon stays up after start before it may exit.
    ///
    /// Supervisors such as launchd throttle jobs that exit sooner than their
    /// throttle interval (10 seconds by default).
    #[serde(default = "default_min_uptime_secs")]
    pub min_uptime_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            config_dir: default_config_dir(),
            runtime_dir: default_runtime_dir(),
            min_uptime_secs: default_min_uptime_secs(),
        }
    }
}

fn default_socket_path() -> String {
    "/var/run/wgpilot.sock".to_string()
}

fn default_config_dir() -> String {
    locator::DEFAULT_CONFIG_DIR.to_string()
}

fn default_runtime_dir() -> String {
    "/var/run/wireguard".to_string()
}

fn default_min_uptime_secs() -> u64 {
    10
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
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

fn default_log_level() -> String {
    "info".to_string()
}

/// Host-level overrides scoped to this daemon.
///
/// Read once at startup. Empty strings count as unset.
///
/// ## TOML Example
///
/// ```toml
/// [overrides]
/// install_prefix = "/opt/homebrew"
/// state_tool_path = "/opt/homebrew/bin/wg-quick"
/// ```
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct OverrideConfig {
    /// Installation prefix of the WireGuard tools.
    #[serde(default)]
    pub install_prefix: Option<String>,

    /// Full path of the state-change executable.
    #[serde(default)]
    pub state_tool_path: Option<String>,
}

impl OverrideConfig {
    /// The installation prefix override, if set to a non-empty value.
    pub fn install_prefix(&self) -> Option<&str> {
        self.install_prefix.as_deref().filter(|s| !s.is_empty())
    }

    /// The state-tool override, if set to a non-empty value.
    pub fn state_tool_path(&self) -> Option<&str> {
        self.state_tool_path.as_deref().filter(|s| !s.is_empty())
    }
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist.
    pub async fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match tokio::fs::try_exists(path).await {
            Ok(true) => Self::load(path).await,
            _ => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.socket_path.is_empty() {
            return Err(ConfigError::Validation(
                "daemon.socket_path must not be empty".to_string(),
            ));
        }
        if self.daemon.config_dir.is_empty() {
            return Err(ConfigError::Validation(
                "daemon.config_dir must not be empty".to_string(),
            ));
        }
        if self.daemon.runtime_dir.is_empty() {
            return Err(ConfigError::Validation(
                "daemon.runtime_dir must not be empty".to_string(),
            ));
        }

        if self.daemon.min_uptime_secs > MAX_MIN_UPTIME_SECS {
            return Err(ConfigError::Validation(format!(
                "daemon.min_uptime_secs must be at most {MAX_MIN_UPTIME_SECS}, got {}",
                self.daemon.min_uptime_secs
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        if let Some(prefix) = self.overrides.install_prefix() {
            if !Path::new(prefix).is_absolute() {
                return Err(ConfigError::Validation(format!(
                    "overrides.install_prefix must be an absolute path, got {prefix:?}"
                )));
            }
        }
        if let Some(tool) = self.overrides.state_tool_path() {
            if !Path::new(tool).is_absolute() {
                return Err(ConfigError::Validation(format!(
                    "overrides.state_tool_path must be an absolute path, got {tool:?}"
                )));
            }
        }

        Ok(())
    }

    /// Resolve tunnel search directories and the state tool from this config.
    pub fn locator(&self) -> ConfigLocator {
        ConfigLocator::new(&self.daemon.config_dir, &self.overrides)
    }
}
