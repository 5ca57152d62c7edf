//! # Pyth Adapter
//!
//! Upstream side of the price relay: resolves canonical symbols against the
//! Hermes feed catalogue and keeps one reconnecting WebSocket subscription to
//! the Hermes price stream.

pub mod client;
pub mod config;
pub mod error;
pub mod resolver;

pub use client::{ConnectionState, PythFeedClient};
pub use config::PythAdapterConfig;
pub use error::{AdapterError, Result};
pub use resolver::{FeedAttributes, FeedCandidate, FeedLookup, HermesLookup, Resolution, SymbolResolver};
