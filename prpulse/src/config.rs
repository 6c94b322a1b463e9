use api::config::{Listener, ListenerError, RateLimitConfig, RateLimitError};
use gateway::config::{GatewayConfig, ValidationError};
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub sentry_dsn: Option<String>,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            sentry_dsn: None,
        }
    }
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct VaultConfig {
    /// Environment variable holding the hex encoded encryption key
    pub key_env: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        VaultConfig {
            key_env: "ENCRYPTION_KEY".into(),
        }
    }
}

fn default_admin_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 3001,
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    #[serde(flatten)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        if self.listener == self.admin_listener {
            return Err(ConfigError::SharedListener(self.listener.address()));
        }
        self.gateway.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid listener: {0}")]
    Listener(#[from] ListenerError),
    #[error("api and admin listeners both bind {0}")]
    SharedListener(String),
    #[error("invalid gateway settings: {0}")]
    Gateway(#[from] ValidationError),
    #[error("invalid rate limit: {0}")]
    RateLimit(#[from] RateLimitError),
}
