//! Error types for the Pyth adapter

use thiserror::Error;

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Main error type for adapter operations
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Connection-related errors
    #[error("Connection to {url} failed: {reason}")]
    ConnectionFailed {
        /// Endpoint that failed
        url: String,
        /// Reason for the failure
        reason: String,
    },

    /// Connection attempt exceeded its time budget
    #[error("Connection to {url} timed out after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Endpoint that timed out
        url: String,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Established connection went away
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Lookup service returned no candidate that matches exactly
    #[error("No feed matches symbol {symbol}")]
    NoMatchingFeed {
        /// The symbol that was looked up
        symbol: String,
    },

    /// Lookup request failed
    #[error("Lookup for {symbol} failed: {reason}")]
    LookupFailed {
        /// The symbol that was looked up
        symbol: String,
        /// Underlying error message
        reason: String,
    },

    /// Frame could not be decoded
    #[error("Failed to decode price: {0}")]
    Decode(#[from] types::TypesError),

    /// JSON parsing error
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Configuration error in adapter settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The feed worker task has exited
    #[error("Feed worker is no longer running")]
    WorkerStopped,
}
