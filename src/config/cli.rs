//! Command line flags shared by the binaries.
//!
//! Every flag is optional; when given it overrides the loaded [`Config`].

use clap::Args;

use super::{BrokerConfig, Config, ManagementConfig, CONFIG_ENV_VAR};

/// Location of the configuration file.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// YAML configuration file.
    #[arg(long = "config", env = CONFIG_ENV_VAR)]
    pub path: Option<String>,
}

/// Broker connection overrides.
#[derive(Debug, Clone, Default, Args)]
pub struct BrokerArgs {
    /// Broker host name.
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Virtual host.
    #[arg(long)]
    pub vhost: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long, hide_env_values = true, env = "WARREN_PASSWORD")]
    pub password: Option<String>,

    /// Heartbeat interval in seconds.
    #[arg(long)]
    pub heartbeat: Option<u64>,
}

impl BrokerArgs {
    pub fn apply(&self, broker: &mut BrokerConfig) {
        if let Some(host) = &self.host {
            broker.host = host.clone();
        }
        if let Some(port) = self.port {
            broker.port = port;
        }
        if let Some(vhost) = &self.vhost {
            broker.vhost = vhost.clone();
        }
        if let Some(username) = &self.username {
            broker.username = username.clone();
        }
        if let Some(password) = &self.password {
            broker.password = password.clone();
        }
        if let Some(heartbeat) = self.heartbeat {
            broker.heartbeat_secs = heartbeat;
        }
    }
}

/// Management API overrides.
#[derive(Debug, Clone, Default, Args)]
pub struct ManagementArgs {
    /// Management API base URL, e.g. http://localhost:15672.
    #[arg(long = "host")]
    pub url: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long, hide_env_values = true, env = "WARREN_PASSWORD")]
    pub password: Option<String>,
}

impl ManagementArgs {
    pub fn apply(&self, management: &mut ManagementConfig) {
        if let Some(url) = &self.url {
            management.url = url.clone();
        }
        if let Some(username) = &self.username {
            management.username = username.clone();
        }
        if let Some(password) = &self.password {
            management.password = password.clone();
        }
    }
}

/// Load the configuration and apply broker flag overrides.
pub fn broker_config(
    config: &ConfigArgs,
    broker: &BrokerArgs,
) -> Result<BrokerConfig, super::ConfigError> {
    let mut loaded = Config::load(config.path.as_deref())?;
    broker.apply(&mut loaded.broker);
    loaded.validate()?;
    Ok(loaded.broker)
}

/// Load the configuration and apply management flag overrides.
pub fn management_config(
    config: &ConfigArgs,
    management: &ManagementArgs,
) -> Result<ManagementConfig, super::ConfigError> {
    let mut loaded = Config::load(config.path.as_deref())?;
    management.apply(&mut loaded.management);
    loaded.validate()?;
    Ok(loaded.management)
}
