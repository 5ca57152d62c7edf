//! Price Relay Server
//!
//! Holds one upstream price stream and fans its ticks out to any number of
//! downstream WebSocket subscribers, subscribing upstream only to symbols that
//! at least one subscriber (or the pinned initial set) still wants.

pub mod client;
pub mod config;
pub mod error;
pub mod server;

pub use client::serve_connection;
pub use config::{RelayConfig, ENV_PREFIX};
pub use error::{Result, ServiceError};
pub use server::RelayServer;
