//! Application configuration.
//!
//! Loaded from YAML files and `SR_POST__`-prefixed environment variables.

use std::sync::Arc;

use serde::Deserialize;

use crate::checksum::ChecksumKind;
use crate::post::{FsContentSource, Poster};
use crate::routing::Router;
use crate::session::{SessionSettings, DEFAULT_SENDER};
use crate::transport::ExchangeSpec;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "sr_post.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "SR_POST_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "SR_POST";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "SR_POST_LOG";

/// Broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Extra connection attempts at session init.
    pub connect_retries: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            connect_retries: 0,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    /// Exchange declared at init and deleted at cleanup.
    pub exchange: ExchangeSpec,
    /// Sender identity stamped on each advertisement.
    pub sender: String,
    /// Prepended to every routing key (e.g. `v02.post`).
    pub topic_prefix: Option<String>,
    pub checksum: ChecksumKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            exchange: ExchangeSpec::default(),
            sender: DEFAULT_SENDER.to_string(),
            topic_prefix: None,
            checksum: ChecksumKind::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `sr_post.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            exchange: self.exchange.clone(),
            sender: self.sender.clone(),
            connect_retries: self.broker.connect_retries,
        }
    }

    pub fn router(&self) -> Router {
        match &self.topic_prefix {
            Some(prefix) => Router::with_prefix(prefix.as_str()),
            None => Router::default(),
        }
    }

    /// Poster reading files from the local filesystem.
    pub fn poster(&self) -> Poster {
        Poster::new(
            self.router(),
            Arc::from(self.checksum.build()),
            Arc::new(FsContentSource),
        )
    }
}
