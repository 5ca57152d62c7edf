//! # Subscription Registry
//!
//! Reference-counted view of downstream interest.
//!
//! Two maps are kept in lockstep:
//! - `clients`: each registered client's requested symbols
//! - `subscribers`: each symbol's set of interested clients
//!
//! A symbol's reference count is the size of its subscriber set. Empty sets are
//! removed, so a symbol is present in `subscribers` exactly when at least one
//! registered client lists it. The registry has no interior locking; its owner
//! (the multiplexer) serializes every mutation.

use crate::ClientId;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Result of adding symbols to one client
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionChange {
    /// Symbols whose count went from zero to one, in request order
    pub added: Vec<String>,
    /// The client's full symbol set after the change, sorted
    pub symbols: Vec<String>,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    clients: HashMap<ClientId, BTreeSet<String>>,
    subscribers: HashMap<String, HashSet<ClientId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client with an empty symbol set. Returns false if it was already present.
    pub fn register(&mut self, client_id: ClientId) -> bool {
        if self.clients.contains_key(&client_id) {
            return false;
        }
        self.clients.insert(client_id, BTreeSet::new());
        true
    }

    /// Add symbols to a registered client's set.
    ///
    /// Symbols the client already holds are left untouched, so repeating a request
    /// never inflates a count. Returns `None` for an unknown client.
    pub fn add_symbols(&mut self, client_id: ClientId, symbols: &[String]) -> Option<SubscriptionChange> {
        let client_symbols = self.clients.get_mut(&client_id)?;
        let mut added = Vec::new();

        for symbol in symbols {
            if !client_symbols.insert(symbol.clone()) {
                continue;
            }
            let subscribers = self.subscribers.entry(symbol.clone()).or_default();
            subscribers.insert(client_id);
            if subscribers.len() == 1 {
                added.push(symbol.clone());
            }
        }

        debug!(
            "Client {} now holds {} symbols ({} new upstream)",
            client_id,
            client_symbols.len(),
            added.len()
        );

        Some(SubscriptionChange {
            added,
            symbols: client_symbols.iter().cloned().collect(),
        })
    }

    /// Remove a client and release its symbols.
    ///
    /// Returns the symbols whose count dropped to zero, sorted, or `None` if the
    /// client was not registered.
    pub fn remove_client(&mut self, client_id: &ClientId) -> Option<Vec<String>> {
        let symbols = self.clients.remove(client_id)?;
        let mut released = Vec::new();

        for symbol in symbols {
            if let Some(subscribers) = self.subscribers.get_mut(&symbol) {
                subscribers.remove(client_id);
                if subscribers.is_empty() {
                    self.subscribers.remove(&symbol);
                    released.push(symbol);
                }
            }
        }

        Some(released)
    }

    pub fn reference_count(&self, symbol: &str) -> usize {
        self.subscribers.get(symbol).map(HashSet::len).unwrap_or(0)
    }

    /// Every symbol with a non-zero count, sorted
    pub fn global_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.subscribers.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn client_symbols(&self, client_id: &ClientId) -> Option<Vec<String>> {
        self.clients
            .get(client_id)
            .map(|symbols| symbols.iter().cloned().collect())
    }

    /// Clients interested in `symbol`
    pub fn subscribers(&self, symbol: &str) -> Vec<ClientId> {
        self.subscribers
            .get(symbol)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_clients: self.clients.len(),
            total_symbols: self.subscribers.len(),
            total_subscriptions: self.clients.values().map(BTreeSet::len).sum(),
        }
    }

    pub fn clear(&mut self) {
        self.clients.clear();
        self.subscribers.clear();
    }
}

/// Registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_clients: usize,
    pub total_symbols: usize,
    pub total_subscriptions: usize,
}
