use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listener: ListenerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default)]
    pub on_connection: ConnectionPolicy,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            backlog: default_backlog(),
            on_connection: ConnectionPolicy::default(),
        }
    }
}

/// What the accept loop does with a socket once it has been reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPolicy {
    /// Keep the socket open and unread until the listener closes
    #[default]
    Hold,
    /// Close the socket right after the connection event
    Drop,
}

fn default_bind() -> String {
    "0.0.0.0:8090".to_string()
}
fn default_backlog() -> u32 {
    1024
}

impl Config {
    /// Load configuration from a YAML file
    pub async fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_string())
            } else {
                ConfigError::IoError(e.to_string())
            }
        })?;

        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string (useful for testing)
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Replace the bind address, e.g. from a CLI flag
    pub fn with_bind(mut self, bind: impl Into<String>) -> Result<Self, ConfigError> {
        self.listener.bind = bind.into();
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listener.bind_addr()?;

        if self.listener.backlog == 0 {
            return Err(ConfigError::ValidationError(
                "Listener backlog must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

impl ListenerConfig {
    /// Parsed form of `bind`
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind.parse().map_err(|e| {
            ConfigError::ValidationError(format!(
                "Listener bind address '{}' is invalid: {}",
                self.bind, e
            ))
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}
