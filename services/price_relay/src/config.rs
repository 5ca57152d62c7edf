//! Relay server configuration
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML or
//! JSON file, then `PRICE_RELAY__*` environment variables (`__` separates
//! nesting levels, e.g. `PRICE_RELAY__UPSTREAM__RECONNECT_DELAY_MS`). The binary
//! applies command-line flags on top.

use crate::error::{Result, ServiceError};
use config_crate::{Config, Environment, File};
use pyth_adapter::PythAdapterConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "PRICE_RELAY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// WebSocket server bind address
    pub bind_address: String,

    /// WebSocket server port
    pub port: u16,

    /// Path segment of the WebSocket endpoint
    pub ws_path: String,

    /// Maximum number of concurrent downstream connections
    pub max_connections: usize,

    /// Enable CORS for web browsers
    pub enable_cors: bool,

    /// Symbols kept subscribed upstream regardless of downstream interest
    pub initial_symbols: Vec<String>,

    /// Upstream oracle settings
    pub upstream: PythAdapterConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            ws_path: "ws".to_string(),
            max_connections: 1000,
            enable_cors: true,
            initial_symbols: ["BTC", "SOL", "ETH", "JUP"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            upstream: PythAdapterConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load defaults, then `path` if given, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("initial_symbols")
            .try_parsing(true)
    }

    fn load_with(path: Option<&Path>, environment: Environment) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            info!("Loading configuration file {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ws_path.is_empty() || self.ws_path.contains('/') {
            return Err(ServiceError::Configuration {
                message: format!("WebSocket path must be one non-empty segment, got '{}'", self.ws_path),
            });
        }
        if matches!(self.ws_path.as_str(), "health" | "status") {
            return Err(ServiceError::Configuration {
                message: format!("WebSocket path '{}' collides with a built-in route", self.ws_path),
            });
        }
        if self.max_connections == 0 {
            return Err(ServiceError::Configuration {
                message: "max_connections must be greater than zero".to_string(),
            });
        }
        self.socket_addr()?;
        self.upstream.validate()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| ServiceError::Configuration {
                message: format!("Invalid bind address: {}", e),
            })
    }

    /// Effective configuration rendered as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ServiceError::Configuration {
            message: format!("Failed to render configuration: {}", e),
        })
    }
}
