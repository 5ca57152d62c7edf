//! # Symbol Resolution
//!
//! Maps canonical tickers ("BTC") to the feed ids the oracle streams under.
//!
//! Each symbol is looked up at most once per process; hits are kept in two
//! append-only caches (symbol to id, id to symbol). The reverse cache is what the
//! stream parser uses to name incoming ticks.
//!
//! Candidate matching compares whole strings only. A lookup for "BTC" returns
//! "WBTC" and friends as candidates too, and accepting any of them would
//! attribute the wrong prices to a symbol.

use crate::error::{AdapterError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use types::{FeedId, FeedIdentity};

/// One entry of a lookup response
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedCandidate {
    pub id: FeedId,
    #[serde(default)]
    pub attributes: FeedAttributes,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FeedAttributes {
    /// Fully-qualified name, e.g. "Crypto.BTC/USD"
    #[serde(default)]
    pub symbol: String,
    /// Display form, e.g. "BTC/USD"
    #[serde(default)]
    pub display_symbol: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub asset_type: Option<String>,
}

impl FeedCandidate {
    /// True when this candidate is the feed for `query` (a canonical symbol)
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_ascii_uppercase();
        let display = self.attributes.display_symbol.to_ascii_uppercase();
        let qualified = self.attributes.symbol.to_ascii_uppercase();

        display == query
            || display == format!("{query}/USD")
            || qualified == format!("CRYPTO.{query}/USD")
    }
}

/// Free-text search over the oracle's feed catalogue
#[async_trait]
pub trait FeedLookup: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<Vec<FeedCandidate>>;
}

/// Hermes REST catalogue (`GET /v2/price_feeds`)
pub struct HermesLookup {
    client: reqwest::Client,
    base_url: String,
}

impl HermesLookup {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FeedLookup for HermesLookup {
    async fn lookup(&self, query: &str) -> Result<Vec<FeedCandidate>> {
        let url = format!("{}/v2/price_feeds", self.base_url);
        debug!("Looking up feeds for {}", query);

        let candidates = self
            .client
            .get(&url)
            .query(&[("query", query), ("asset_type", "crypto")])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<FeedCandidate>>()
            .await?;

        Ok(candidates)
    }
}

/// Outcome of one resolve call. Both lists keep request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub resolved: Vec<FeedIdentity>,
    pub failed: Vec<String>,
}

pub struct SymbolResolver {
    lookup: Arc<dyn FeedLookup>,
    by_symbol: DashMap<String, FeedId>,
    by_feed: DashMap<FeedId, String>,
}

impl SymbolResolver {
    pub fn new(lookup: Arc<dyn FeedLookup>) -> Self {
        Self {
            lookup,
            by_symbol: DashMap::new(),
            by_feed: DashMap::new(),
        }
    }

    /// Resolve `symbols`, looking up uncached ones concurrently.
    ///
    /// A failed lookup only affects its own symbol. Nothing is retried.
    pub async fn resolve(&self, symbols: &[String]) -> Resolution {
        let mut unique: Vec<&String> = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if !unique.contains(&symbol) {
                unique.push(symbol);
            }
        }

        let uncached: Vec<&String> = unique
            .iter()
            .copied()
            .filter(|symbol| !self.by_symbol.contains_key(*symbol))
            .collect();
        let lookups = join_all(uncached.iter().map(|symbol| self.lookup_symbol(symbol))).await;

        let mut outcomes: Vec<(&String, Result<FeedId>)> = uncached.into_iter().zip(lookups).collect();
        let mut resolution = Resolution::default();

        for symbol in unique {
            if let Some(feed_id) = self.feed_id_for(symbol) {
                resolution.resolved.push(FeedIdentity::new(symbol.clone(), feed_id));
                continue;
            }

            let Some(index) = outcomes.iter().position(|(pending, _)| *pending == symbol) else {
                resolution.failed.push(symbol.clone());
                continue;
            };
            let (_, outcome) = outcomes.swap_remove(index);

            match outcome {
                Ok(feed_id) => {
                    self.by_symbol.insert(symbol.clone(), feed_id.clone());
                    self.by_feed.insert(feed_id.clone(), symbol.clone());
                    info!("Resolved {} to feed {}", symbol, feed_id);
                    resolution.resolved.push(FeedIdentity::new(symbol.clone(), feed_id));
                }
                Err(e) => {
                    warn!("Failed to resolve {}: {}", symbol, e);
                    resolution.failed.push(symbol.clone());
                }
            }
        }

        resolution
    }

    async fn lookup_symbol(&self, symbol: &str) -> Result<FeedId> {
        let candidates = self
            .lookup
            .lookup(symbol)
            .await
            .map_err(|e| AdapterError::LookupFailed {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;

        candidates
            .into_iter()
            .find(|candidate| candidate.matches(symbol))
            .map(|candidate| candidate.id)
            .ok_or_else(|| AdapterError::NoMatchingFeed {
                symbol: symbol.to_string(),
            })
    }

    pub fn feed_id_for(&self, symbol: &str) -> Option<FeedId> {
        self.by_symbol.get(symbol).map(|entry| entry.value().clone())
    }

    /// Reverse lookup used to name streamed ticks
    pub fn symbol_for(&self, feed_id: &FeedId) -> Option<String> {
        self.by_feed.get(feed_id).map(|entry| entry.value().clone())
    }

    pub fn cached_count(&self) -> usize {
        self.by_symbol.len()
    }
}
