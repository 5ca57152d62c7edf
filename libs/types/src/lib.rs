//! # Price Relay Types
//!
//! Shared wire model for the price relay workspace.
//!
//! - **Feed identities**: [`FeedId`] and [`FeedIdentity`] pair a human ticker with the
//!   opaque identifier the upstream oracle streams under.
//! - **Ticks**: [`PriceTick`] is the only payload that flows downstream.
//! - **Symbols**: [`symbol::normalize`] defines the single canonical symbol form used on
//!   both sides of the relay.
//! - **Prices**: [`price::decode_price`] turns the oracle's `(mantissa, exponent)` pair
//!   into a rounded decimal.
//! - **Protocol**: serde models for the downstream and upstream JSON frames.

pub mod error;
pub mod feed;
pub mod price;
pub mod protocol;
pub mod symbol;

pub use error::{Result, TypesError};
pub use feed::{FeedId, FeedIdentity, PriceTick};
pub use price::{decode_price, PRICE_DECIMALS};
pub use protocol::downstream::{ClientRequest, DownstreamMessage, CONNECTED_MESSAGE};
pub use protocol::upstream::{
    Mantissa, PriceFeedUpdate, PricePayload, UpstreamMessage, UpstreamRequest,
};
pub use symbol::normalize;
