//! Configuration for chat sessions
//!
//! A [`SessionConfig`] names the broker and topic for one chat session. The
//! optional [`MqttSection`] tunes client behaviour (timeouts, keep-alive,
//! credentials). Both can be loaded together from a TOML file as a
//! [`ChatConfig`].

use crate::protocol::topics::{validate_topic_name, TopicError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default MQTT port for plain TCP connections
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Complete configuration file layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatConfig {
    pub session: SessionConfig,
    #[serde(default)]
    pub mqtt: MqttSection,
}

/// Broker address and chat topic for one session
///
/// Immutable once a session is established; reconfiguring tears down the
/// previous connection first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Broker host name or IP address
    pub host: String,
    /// Broker port (1-65535)
    pub port: u16,
    /// Topic both peers publish and subscribe to
    pub topic: String,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16, topic: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            topic: topic.into(),
        }
    }

    /// Build a session config from a broker URL such as `mqtt://10.0.0.5:1883`
    pub fn from_broker_url(broker_url: &str, topic: impl Into<String>) -> Result<Self, ConfigError> {
        let url = Url::parse(broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

        if url.scheme() != "mqtt" && url.scheme() != "tcp" {
            return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string()));
        }

        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;
        let port = url.port().unwrap_or(DEFAULT_MQTT_PORT);

        let config = Self::new(host, port, topic);
        config.validate()?;
        Ok(config)
    }

    /// Validate host, port and topic before any network attempt
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        validate_topic_name(&self.topic)?;
        Ok(())
    }
}

/// MQTT client tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Prefix for the generated client identifier
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Maximum time to wait for CONNACK
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Maximum time to wait for a publish acknowledgment
    #[serde(default = "default_timeout_ms")]
    pub publish_timeout_ms: u64,
    /// Maximum time to wait for SUBACK
    #[serde(default = "default_timeout_ms")]
    pub subscribe_timeout_ms: u64,
    /// Capacity of the bounded inbound buffer between the reader and the log
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
    /// Environment variable containing the username
    pub username_env: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
}

fn default_client_id_prefix() -> String {
    "mqtt-chat".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_feed_capacity() -> usize {
    256
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_timeout_ms(),
            publish_timeout_ms: default_timeout_ms(),
            subscribe_timeout_ms: default_timeout_ms(),
            feed_capacity: default_feed_capacity(),
            username_env: None,
            password_env: None,
        }
    }
}

impl MqttSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Resolve credentials from the configured environment variables
    ///
    /// Returns `None` unless the username variable is set. A missing password
    /// variable resolves to an empty password.
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = self
            .username_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())?;
        let password = self
            .password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .unwrap_or_default();
        Some((username, password))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0
            || self.publish_timeout_ms == 0
            || self.subscribe_timeout_ms == 0
        {
            return Err(ConfigError::InvalidConfig(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        if self.feed_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "feed_capacity must be greater than 0".to_string(),
            ));
        }
        // rumqttc rejects keep-alive intervals below five seconds
        if self.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(
                "keep_alive_secs must be at least 5".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Broker host cannot be empty")]
    EmptyHost,
    #[error("Invalid port {0}: must be between 1 and 65535")]
    InvalidPort(u16),
    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ChatConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ChatConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        self.mqtt.validate()
    }
}
