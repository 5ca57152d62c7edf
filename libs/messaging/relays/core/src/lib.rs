//! # Price Relay Core
//!
//! Subscription bookkeeping and fan-out shared by the relay service.
//!
//! One upstream oracle stream serves any number of downstream peers. The
//! [`SubscriptionMultiplexer`] is the single writer of the reference-counted
//! subscription set: it turns per-peer interest into the minimal upstream
//! subscription through the [`UpstreamFeed`] seam and routes every tick only to
//! the peers that asked for its symbol.

pub mod connection;
pub mod multiplexer;
pub mod registry;
pub mod upstream;

pub use connection::{ClientId, DownstreamConnection};
pub use multiplexer::{MultiplexerStats, SubscriptionMultiplexer};
pub use registry::{RegistryStats, SubscriptionChange, SubscriptionRegistry};
pub use upstream::UpstreamFeed;

/// Relay-specific errors
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Client not found: {0}")]
    ClientNotFound(ClientId),

    #[error("Client already registered: {0}")]
    DuplicateClient(ClientId),

    #[error("Maximum connections reached ({limit})")]
    ConnectionLimit { limit: usize },

    #[error("Failed to send message to client {0}")]
    SendFailed(ClientId),

    #[error("Relay is shut down")]
    ShutDown,
}

/// Result type for relay operations
pub type RelayResult<T> = std::result::Result<T, RelayError>;
