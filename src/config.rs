//! Dashboard configuration file.
//!
//! A single TOML file with a `[mqtt]` and a `[log]` table. Missing keys fall
//! back to their defaults, so a file only needs the values it changes.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn, Level};

use crate::dashboard::DEFAULT_LOG_CAPACITY;
use crate::mqtt::config::MqttConfig;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "PARKING_DASHBOARD_CONFIG";
const CONFIG_DIR: &str = "parking-dashboard";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Broker host is empty")]
    EmptyHost,

    #[error("Broker port must not be 0")]
    ZeroPort,

    #[error("No telemetry topics to subscribe to")]
    NoSubscribeTopics,

    #[error("Invalid subscribe topic filter '{0}'")]
    InvalidFilter(String),

    #[error("Invalid publish topic '{0}', wildcards are not allowed")]
    InvalidTopic(String),

    #[error("Command QoS {0} is not one of 0, 1, 2")]
    InvalidQos(u8),

    #[error("Keep alive must be at least one second")]
    ZeroKeepAlive,

    #[error("Connect timeout must not be 0")]
    ZeroConnectTimeout,

    #[error("Initial backoff {initial_ms}ms exceeds maximum {max_ms}ms")]
    BackoffRange { initial_ms: u64, max_ms: u64 },

    #[error("Log capacity must not be 0")]
    ZeroLogCapacity,

    #[error("Unknown log level '{0}'")]
    InvalidLogLevel(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Number of message log records kept for display
    pub capacity: usize,
    /// Maximum tracing level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOG_CAPACITY,
            level: "info".to_string(),
        }
    }
}

impl LogConfig {
    pub fn level(&self) -> Result<Level, ConfigError> {
        Level::from_str(self.level.trim()).map_err(|_| ConfigError::InvalidLogLevel(self.level.clone()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub mqtt: MqttConfig,
    pub log: LogConfig,
}

impl DashboardConfig {
    /// `$PARKING_DASHBOARD_CONFIG`, or `config.toml` in the user config dir.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }

        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::from_toml(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file {}: {}", path.display(), e))?;
        Ok(())
    }

    /// Writes the default configuration unless a file already exists.
    pub async fn ensure_default_config(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            return Ok(());
        }

        info!("Creating default configuration at {}", path.display());
        Self::default().save(path).await
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mqtt = &self.mqtt;

        if mqtt.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if mqtt.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if mqtt.subscribe_topics.is_empty() {
            return Err(ConfigError::NoSubscribeTopics);
        }
        if let Some(filter) = mqtt
            .subscribe_topics
            .iter()
            .find(|filter| filter.is_empty() || !rumqttc::valid_filter(filter))
        {
            return Err(ConfigError::InvalidFilter(filter.clone()));
        }
        for topic in [&mqtt.publish_topic, &mqtt.status_topic] {
            if topic.is_empty() || !rumqttc::valid_topic(topic) {
                return Err(ConfigError::InvalidTopic(topic.clone()));
            }
        }
        if mqtt.command_qos > 2 {
            return Err(ConfigError::InvalidQos(mqtt.command_qos));
        }
        if mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::ZeroKeepAlive);
        }
        if mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        if mqtt.reconnect.initial_backoff_ms > mqtt.reconnect.max_backoff_ms {
            return Err(ConfigError::BackoffRange {
                initial_ms: mqtt.reconnect.initial_backoff_ms,
                max_ms: mqtt.reconnect.max_backoff_ms,
            });
        }
        if self.log.capacity == 0 {
            return Err(ConfigError::ZeroLogCapacity);
        }
        self.log.level()?;

        Ok(())
    }
}
