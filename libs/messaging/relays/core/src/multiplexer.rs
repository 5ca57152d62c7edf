//! # Subscription Multiplexer
//!
//! The only component that sees both sides of the relay. It owns the downstream
//! connection table and the [`SubscriptionRegistry`], forwards zero-to-one and
//! one-to-zero reference count transitions to the [`UpstreamFeed`], and fans
//! every tick out to the peers that hold its symbol.
//!
//! All state sits behind one mutex. Critical sections never await, and upstream
//! requests are enqueued while the lock is held so they reach the upstream in the
//! same order as the count transitions that produced them.

use crate::{ClientId, DownstreamConnection, RelayError, RelayResult, SubscriptionRegistry, UpstreamFeed};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use types::{normalize, DownstreamMessage, PriceTick};

struct MultiplexerState {
    connections: HashMap<ClientId, DownstreamConnection>,
    registry: SubscriptionRegistry,
    closed: bool,
}

/// Snapshot served by the status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultiplexerStats {
    pub connected_clients: usize,
    pub subscribed_symbols: usize,
    pub total_subscriptions: usize,
    pub pinned_symbols: usize,
}

pub struct SubscriptionMultiplexer {
    upstream: Arc<dyn UpstreamFeed>,
    state: Mutex<MultiplexerState>,
    max_connections: usize,
}

impl SubscriptionMultiplexer {
    pub fn new(upstream: Arc<dyn UpstreamFeed>, max_connections: usize) -> Self {
        Self {
            upstream,
            state: Mutex::new(MultiplexerState {
                connections: HashMap::new(),
                registry: SubscriptionRegistry::new(),
                closed: false,
            }),
            max_connections,
        }
    }

    /// Register a peer with an empty subscription and greet it.
    ///
    /// The greeting is queued before the peer becomes visible to fan-out, so it is
    /// always the first frame the peer sees.
    pub fn on_client_connect(&self, connection: DownstreamConnection) -> RelayResult<ClientId> {
        let mut state = self.state.lock();

        if state.closed {
            return Err(RelayError::ShutDown);
        }
        if state.connections.len() >= self.max_connections {
            return Err(RelayError::ConnectionLimit {
                limit: self.max_connections,
            });
        }

        let client_id = connection.id;
        if client_id == ClientId::PINNED || state.connections.contains_key(&client_id) {
            return Err(RelayError::DuplicateClient(client_id));
        }

        connection.send(DownstreamMessage::connected())?;
        state.registry.register(client_id);
        state.connections.insert(client_id, connection);

        info!(
            "Added client {}, total connections: {}",
            client_id,
            state.connections.len()
        );
        Ok(client_id)
    }

    /// Add symbols to a peer's subscription and confirm its full set.
    ///
    /// Symbols are normalized and de-duplicated first; ones that normalize to
    /// nothing are ignored. Returns the peer's full set.
    pub fn on_client_subscribe(&self, client_id: ClientId, symbols: &[String]) -> RelayResult<Vec<String>> {
        let requested = canonical_symbols(symbols);

        let mut state = self.state.lock();
        if !state.connections.contains_key(&client_id) {
            return Err(RelayError::ClientNotFound(client_id));
        }

        let change = state
            .registry
            .add_symbols(client_id, &requested)
            .ok_or(RelayError::ClientNotFound(client_id))?;

        if !change.added.is_empty() {
            info!("Subscribing upstream to {:?}", change.added);
            self.upstream.subscribe(change.added.clone());
        }

        let confirmation = DownstreamMessage::SubscriptionConfirmed {
            symbols: change.symbols.clone(),
        };
        let sent = state
            .connections
            .get(&client_id)
            .map(|connection| connection.send(confirmation));

        if let Some(Err(e)) = sent {
            self.remove_client(&mut state, &client_id);
            return Err(e);
        }

        debug!("Client {} subscribed to {:?}", client_id, change.symbols);
        Ok(change.symbols)
    }

    /// Drop a peer and release its symbols. Safe to call more than once.
    pub fn on_client_disconnect(&self, client_id: ClientId) -> bool {
        let mut state = self.state.lock();
        self.remove_client(&mut state, &client_id)
    }

    /// Deliver a tick to every peer holding its symbol. Returns the number of
    /// peers it reached. Peers whose channel is closed are pruned.
    pub fn on_upstream_tick(&self, tick: PriceTick) -> usize {
        let Some(symbol) = normalize(&tick.symbol) else {
            debug!("Dropping tick with empty symbol");
            return 0;
        };

        debug!("Price update {}: {} @ {}", symbol, tick.price, tick.timestamp);
        let message = DownstreamMessage::PriceUpdate {
            data: PriceTick {
                symbol: symbol.clone(),
                ..tick
            },
        };

        let mut state = self.state.lock();
        let mut delivered = 0;
        let mut failed_clients = Vec::new();

        for client_id in state.registry.subscribers(&symbol) {
            // The pinned holder has no connection
            let Some(connection) = state.connections.get(&client_id) else {
                continue;
            };
            match connection.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => failed_clients.push(client_id),
            }
        }

        for client_id in failed_clients {
            debug!("Removing disconnected client {} during fan-out", client_id);
            self.remove_client(&mut state, &client_id);
        }

        delivered
    }

    /// Keep `symbols` subscribed upstream for the lifetime of the relay,
    /// independent of any peer. Returns the full pinned set.
    pub fn pin_symbols(&self, symbols: &[String]) -> RelayResult<Vec<String>> {
        let requested = canonical_symbols(symbols);

        let mut state = self.state.lock();
        if state.closed {
            return Err(RelayError::ShutDown);
        }

        state.registry.register(ClientId::PINNED);
        let change = state
            .registry
            .add_symbols(ClientId::PINNED, &requested)
            .ok_or(RelayError::ClientNotFound(ClientId::PINNED))?;

        if !change.added.is_empty() {
            info!("Pinning upstream subscription for {:?}", change.added);
            self.upstream.subscribe(change.added);
        }
        Ok(change.symbols)
    }

    /// Stop the upstream and close every peer.
    ///
    /// Dropping a connection drops its sender, which ends the peer's transport
    /// task and closes the socket.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        state.closed = true;
        self.upstream.disconnect();

        let closed = state.connections.len();
        state.connections.clear();
        state.registry.clear();
        info!("Multiplexer shut down, closed {} client connections", closed);
    }

    /// Drain upstream ticks until the channel closes
    pub async fn run(&self, mut ticks: mpsc::UnboundedReceiver<PriceTick>) {
        while let Some(tick) = ticks.recv().await {
            self.on_upstream_tick(tick);
        }
        info!("Upstream tick channel closed, fan-out loop exiting");
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Symbols with a non-zero reference count, sorted
    pub fn global_symbols(&self) -> Vec<String> {
        self.state.lock().registry.global_symbols()
    }

    pub fn client_symbols(&self, client_id: &ClientId) -> Option<Vec<String>> {
        let state = self.state.lock();
        if !state.connections.contains_key(client_id) {
            return None;
        }
        state.registry.client_symbols(client_id)
    }

    pub fn reference_count(&self, symbol: &str) -> usize {
        self.state.lock().registry.reference_count(symbol)
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> MultiplexerStats {
        let state = self.state.lock();
        let registry = state.registry.stats();
        let pinned_symbols = state
            .registry
            .client_symbols(&ClientId::PINNED)
            .map(|symbols| symbols.len())
            .unwrap_or(0);

        MultiplexerStats {
            connected_clients: state.connections.len(),
            subscribed_symbols: registry.total_symbols,
            total_subscriptions: registry.total_subscriptions - pinned_symbols,
            pinned_symbols,
        }
    }

    fn remove_client(&self, state: &mut MultiplexerState, client_id: &ClientId) -> bool {
        if state.connections.remove(client_id).is_none() {
            return false;
        }

        if let Some(released) = state.registry.remove_client(client_id) {
            if !released.is_empty() {
                info!("Unsubscribing upstream from {:?}", released);
                self.upstream.unsubscribe(released);
            }
        }

        info!(
            "Removed client {}, total connections: {}",
            client_id,
            state.connections.len()
        );
        true
    }
}

fn canonical_symbols(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|symbol| normalize(symbol))
        .filter(|symbol| seen.insert(symbol.clone()))
        .collect()
}
