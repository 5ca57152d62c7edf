//! Configuration management for the Pyth adapter

use crate::error::{AdapterError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Connection and lookup settings for the Pyth Hermes service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PythAdapterConfig {
    /// Streaming endpoint
    pub websocket_url: String,

    /// REST base used for symbol lookup
    pub hermes_url: String,

    /// Fixed delay between reconnect attempts
    pub reconnect_delay_ms: u64,

    /// Upper bound on one connect attempt
    pub connect_timeout_ms: u64,

    /// Upper bound on one symbol lookup request
    pub lookup_timeout_ms: u64,

    /// Consecutive failed attempts after which each failure is logged as an error
    pub reconnect_alert_threshold: u32,
}

impl Default for PythAdapterConfig {
    fn default() -> Self {
        Self {
            websocket_url: "wss://hermes.pyth.network/ws".to_string(),
            hermes_url: "https://hermes.pyth.network".to_string(),
            reconnect_delay_ms: 5000,
            connect_timeout_ms: 10000,
            lookup_timeout_ms: 10000,
            reconnect_alert_threshold: 12,
        }
    }
}

impl PythAdapterConfig {
    pub fn validate(&self) -> Result<()> {
        let websocket = Url::parse(&self.websocket_url).map_err(|e| {
            AdapterError::Configuration(format!("Invalid WebSocket URL '{}': {}", self.websocket_url, e))
        })?;
        if !matches!(websocket.scheme(), "ws" | "wss") {
            return Err(AdapterError::Configuration(
                "Invalid WebSocket URL scheme".to_string(),
            ));
        }

        let hermes = Url::parse(&self.hermes_url).map_err(|e| {
            AdapterError::Configuration(format!("Invalid Hermes URL '{}': {}", self.hermes_url, e))
        })?;
        if !matches!(hermes.scheme(), "http" | "https") {
            return Err(AdapterError::Configuration(
                "Invalid Hermes URL scheme".to_string(),
            ));
        }

        if self.connect_timeout_ms == 0 || self.lookup_timeout_ms == 0 {
            return Err(AdapterError::Configuration(
                "Timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}
