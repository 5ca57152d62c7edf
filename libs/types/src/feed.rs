//! Feed identities and price ticks

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier the oracle uses for one instrument.
///
/// The lookup API returns ids with a `0x` prefix while streamed frames carry them
/// bare, so the id is normalized (prefix stripped, lowercased) on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FeedId(String);

impl FeedId {
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        let bare = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        Self(bare.to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for FeedId {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<&str> for FeedId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<FeedId> for String {
    fn from(id: FeedId) -> Self {
        id.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved `(symbol, feed id)` pair. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedIdentity {
    pub symbol: String,
    pub feed_id: FeedId,
}

impl FeedIdentity {
    pub fn new(symbol: impl Into<String>, feed_id: FeedId) -> Self {
        Self {
            symbol: symbol.into(),
            feed_id,
        }
    }
}

/// One decoded price observation, keyed by canonical symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    /// Publish time in milliseconds since the Unix epoch
    pub timestamp: i64,
}
