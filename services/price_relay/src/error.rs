//! Error types for the price relay server

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config_crate::ConfigError),

    #[error("Upstream adapter error: {0}")]
    Adapter(#[from] pyth_adapter::AdapterError),

    #[error("Relay error: {0}")]
    Relay(#[from] relay_core::RelayError),

    #[error("HTTP error: {0}")]
    Http(#[from] warp::Error),

    #[error("Relay server already started")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, ServiceError>;
