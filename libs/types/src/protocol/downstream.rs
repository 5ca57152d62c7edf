//! Frames exchanged with downstream peers

use crate::feed::PriceTick;
use serde::{Deserialize, Serialize};

/// Greeting sent on every new downstream connection
pub const CONNECTED_MESSAGE: &str = "Ready for pricing";

/// Requests a peer may send. The protocol is additive: there is no per-symbol
/// unsubscribe, a peer's interest ends when its connection closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Subscribe { symbols: Vec<String> },
}

/// Frames the relay sends to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownstreamMessage {
    Connected { message: String },
    SubscriptionConfirmed { symbols: Vec<String> },
    PriceUpdate { data: PriceTick },
}

impl DownstreamMessage {
    pub fn connected() -> Self {
        Self::Connected {
            message: CONNECTED_MESSAGE.to_string(),
        }
    }
}
