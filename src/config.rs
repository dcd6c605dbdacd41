//! Configuration for the CRI connector

use crate::{CriError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Default CRI command port of an iRC robot controller
pub const DEFAULT_CRI_PORT: u16 = 3921;

/// Endpoint and tuning for one controller connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectorConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub connection: Option<ConnectionConfig>,
}

fn default_port() -> u16 {
    DEFAULT_CRI_PORT
}

/// Connection tuning; every field falls back to a built-in default
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: Option<u64>,
    pub state_timeout_ms: Option<u64>,
    pub command_ack_timeout_ms: Option<u64>,
    pub keepalive_interval_ms: Option<u64>,
}

impl ConnectorConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connection: None,
        }
    }

    pub fn load_from_path(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| CriError::Config(format!("Failed to read {}: {}", path, e)))?;

        let config: ConnectorConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Connection tuning with defaults applied
    pub fn connection(&self) -> ConnectionConfig {
        self.connection.clone().unwrap_or_default()
    }
}

impl ConnectionConfig {
    /// Connection establishment timeout with default fallback
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.unwrap_or(2_000))
    }

    /// Wait bound for the first STATUS broadcast with default fallback
    pub fn state_timeout(&self) -> Duration {
        Duration::from_millis(self.state_timeout_ms.unwrap_or(2_000))
    }

    /// Command acknowledgement timeout with default fallback
    pub fn command_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.command_ack_timeout_ms.unwrap_or(500))
    }

    /// ALIVEJOG keepalive period with default fallback
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms.unwrap_or(50))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_yaml_uses_defaults() {
        let config: ConnectorConfig = serde_yaml::from_str("host: 192.168.3.11\n").unwrap();
        assert_eq!(config.host, "192.168.3.11");
        assert_eq!(config.port, DEFAULT_CRI_PORT);

        let tuning = config.connection();
        assert_eq!(tuning.connect_timeout(), Duration::from_millis(2_000));
        assert_eq!(tuning.state_timeout(), Duration::from_millis(2_000));
        assert_eq!(tuning.command_ack_timeout(), Duration::from_millis(500));
        assert_eq!(tuning.keepalive_interval(), Duration::from_millis(50));
    }

    #[test]
    fn explicit_tuning_overrides_defaults() {
        let yaml = "host: 10.0.0.2\nport: 3920\nconnection:\n  command_ack_timeout_ms: 250\n";
        let config: ConnectorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 3920);

        let tuning = config.connection();
        assert_eq!(tuning.command_ack_timeout(), Duration::from_millis(250));
        assert_eq!(tuning.state_timeout(), Duration::from_millis(2_000));
    }
}
