//! TOML configuration file for the standalone broker

use cambroker_core::{QoS, StaticCredentials};
use cambroker_tokio::MqttServerConfig;
use serde::Deserialize;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DEFAULT_BIND: &str = "0.0.0.0:1883";

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Failed to read {}: {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "Invalid configuration file: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub broker: BrokerSection,
    pub auth: AuthSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    /// When false the binary exits without listening
    pub enabled: bool,
    pub bind: String,
    #[serde(flatten)]
    pub server: MqttServerConfig,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: DEFAULT_BIND.to_string(),
            server: MqttServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Empty means every client is accepted
    pub username: String,
    /// Lowercase hex SHA-256 of the password
    pub password_hash: String,
}

impl AuthSection {
    pub fn credentials(&self) -> StaticCredentials {
        StaticCredentials::from_hash(self.username.as_str(), &self.password_hash)
    }
}

impl FileConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: FileConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.broker.server;
        if let Err(e) = QoS::from_u8(server.max_qos) {
            return Err(ConfigError::Invalid(format!("broker.max_qos: {}", e)));
        }
        if server.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "broker.max_sessions must be at least 1".to_string(),
            ));
        }
        if server.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "broker.outbound_queue_capacity must be at least 1".to_string(),
            ));
        }
        // Fixed header alone is 2 bytes
        if server.max_packet_size < 2 {
            return Err(ConfigError::Invalid(
                "broker.max_packet_size must be at least 2".to_string(),
            ));
        }
        if self.broker.bind.is_empty() {
            return Err(ConfigError::Invalid("broker.bind is empty".to_string()));
        }
        Ok(())
    }
}
