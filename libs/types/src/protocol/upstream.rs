//! Frames exchanged with the upstream oracle stream
//!
//! Requests carry feed ids only. Inbound frames are parsed leniently: anything
//! other than a price update or a subscription response maps to
//! [`UpstreamMessage::Other`] so new frame types never break the stream.

use crate::error::Result;
use crate::feed::{FeedId, PriceTick};
use crate::price::{decode_price, parse_mantissa};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamRequest {
    Subscribe { ids: Vec<FeedId> },
    Unsubscribe { ids: Vec<FeedId> },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamMessage {
    PriceUpdate {
        price_feed: PriceFeedUpdate,
    },
    Response {
        status: String,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceFeedUpdate {
    pub id: FeedId,
    pub price: PricePayload,
}

impl PriceFeedUpdate {
    /// Decode into a tick for `symbol`. Publish time is converted from seconds
    /// to milliseconds.
    pub fn to_tick(&self, symbol: &str) -> Result<PriceTick> {
        let price = decode_price(self.price.price.value()?, self.price.expo)?;
        Ok(PriceTick {
            symbol: symbol.to_string(),
            price,
            timestamp: self.price.publish_time.saturating_mul(1000),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PricePayload {
    pub price: Mantissa,
    pub expo: i32,
    pub publish_time: i64,
}

/// Integer mantissa, sent as a JSON string by the oracle but accepted as a number too
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Mantissa {
    Int(i64),
    Text(String),
}

impl Mantissa {
    pub fn value(&self) -> Result<i64> {
        match self {
            Self::Int(value) => Ok(*value),
            Self::Text(raw) => parse_mantissa(raw),
        }
    }
}
