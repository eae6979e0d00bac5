//! Application configuration.
//!
//! Broker and management API settings shared by the three programs, loaded
//! from YAML files and environment variables. Command line flags are
//! applied on top by the binaries (see [`cli`]).

pub mod cli;

use std::time::Duration;

use serde::Deserialize;

use crate::bus::amqp::{DEFAULT_BLOCKED_TIMEOUT, DEFAULT_HEARTBEAT};
use crate::bus::LinkParams;
use crate::monitor::management::{ManagementParams, DEFAULT_REQUEST_TIMEOUT};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "warren.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "WARREN_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "WARREN";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// AMQP broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub username: String,
    pub password: String,
    pub heartbeat_secs: u64,
    pub blocked_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let link = LinkParams::default();
        Self {
            host: link.host,
            port: link.port,
            vhost: link.vhost,
            username: link.username,
            password: link.password,
            heartbeat_secs: DEFAULT_HEARTBEAT.as_secs(),
            blocked_timeout_secs: DEFAULT_BLOCKED_TIMEOUT.as_secs(),
        }
    }
}

impl BrokerConfig {
    /// Link parameters labelled with `connection_name`.
    pub fn link_params(&self, connection_name: impl Into<String>) -> LinkParams {
        LinkParams {
            host: self.host.clone(),
            port: self.port,
            vhost: self.vhost.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            connection_name: connection_name.into(),
            heartbeat: Duration::from_secs(self.heartbeat_secs),
            blocked_timeout: Duration::from_secs(self.blocked_timeout_secs),
        }
    }
}

/// Management HTTP API settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManagementConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        let params = ManagementParams::default();
        Self {
            url: params.url,
            username: params.username,
            password: params.password,
            timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl ManagementConfig {
    pub fn params(&self) -> ManagementParams {
        ManagementParams {
            url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub management: ManagementConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `warren.yaml` in current directory (if exists)
    /// 2. File given by `path`, or else by `CONFIG_ENV_VAR` (must exist)
    /// 3. Environment variables such as `WARREN__BROKER__HOST`
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        let explicit = path
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok());
        if let Some(config_path) = explicit {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.host is empty".to_string()));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::Invalid("broker.port must be non-zero".to_string()));
        }
        if self.broker.heartbeat_secs > u64::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "broker.heartbeat_secs must be at most {}",
                u16::MAX
            )));
        }
        if self.broker.blocked_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "broker.blocked_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.management.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "management.timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
