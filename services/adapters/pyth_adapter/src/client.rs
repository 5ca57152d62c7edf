//! # Pyth Feed Client
//!
//! Owns the single upstream WebSocket. A worker task holds the transport, the
//! desired set (symbol to feed id) and the set of symbols whose resolution is
//! still in flight; the [`PythFeedClient`] handle only sends it commands.
//!
//! ## Lifecycle
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected -> ...` with a fixed
//! delay between attempts and no attempt limit. [`PythFeedClient::disconnect`]
//! moves to `Stopped`, cancels any pending reconnect and leaves it there until
//! [`PythFeedClient::connect`] is called again.
//!
//! Every successful connect re-sends a subscribe for the whole desired set, so
//! downstream peers never resubscribe after an upstream drop. Symbols added or
//! removed while disconnected are reflected because the desired set is updated
//! whether or not a transport is open.
//!
//! ## Resolution
//!
//! Lookups run on spawned tasks and report back over a channel, so a slow
//! lookup never stalls the frame loop. Each pending symbol records the
//! generation of the lookup that owns it, and a result is applied only while
//! that generation is still current. A symbol unsubscribed and subscribed again
//! mid-lookup is therefore decided by the newer lookup alone.

use crate::config::PythAdapterConfig;
use crate::error::{AdapterError, Result};
use crate::resolver::{Resolution, SymbolResolver};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_core::UpstreamFeed;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use types::{FeedId, PriceFeedUpdate, PriceTick, UpstreamMessage, UpstreamRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection states for the upstream stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected, a reconnect may be scheduled
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected and receiving frames
    Connected,
    /// Stopped by request, no reconnects
    Stopped,
}

enum FeedCommand {
    Connect,
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Disconnect,
    DesiredSymbols(oneshot::Sender<Vec<String>>),
}

/// Handle to the upstream worker. Cheap to share behind an `Arc`.
pub struct PythFeedClient {
    commands: mpsc::UnboundedSender<FeedCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl PythFeedClient {
    /// Spawn the worker. Decoded ticks are delivered on the returned receiver.
    ///
    /// The worker starts disconnected; call [`connect`](Self::connect) to open the
    /// stream. It exits when every handle has been dropped.
    pub fn spawn(
        config: PythAdapterConfig,
        resolver: Arc<SymbolResolver>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PriceTick>)> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let worker = FeedWorker {
            config,
            resolver,
            desired: BTreeMap::new(),
            pending: HashMap::new(),
            next_generation: 0,
            sink: None,
            stream: None,
            reconnect_at: None,
            manually_stopped: false,
            consecutive_failures: 0,
            state: state_tx,
            ticks: tick_tx,
            resolved: resolved_tx,
        };
        tokio::spawn(worker.run(command_rx, resolved_rx));

        Ok((
            Self {
                commands: command_tx,
                state: state_rx,
            },
            tick_rx,
        ))
    }

    /// Open the stream. No-op when already connected.
    pub fn connect(&self) -> Result<()> {
        self.send(FeedCommand::Connect)
    }

    /// Resolve and subscribe `symbols`. Already desired or pending symbols are skipped.
    pub fn subscribe(&self, symbols: Vec<String>) -> Result<()> {
        self.send(FeedCommand::Subscribe(symbols))
    }

    /// Remove `symbols` from the desired set, connected or not
    pub fn unsubscribe(&self, symbols: Vec<String>) -> Result<()> {
        self.send(FeedCommand::Unsubscribe(symbols))
    }

    /// Close the stream and stop reconnecting
    pub fn disconnect(&self) -> Result<()> {
        self.send(FeedCommand::Disconnect)
    }

    /// Symbols currently in the desired set, sorted
    pub async fn desired_symbols(&self) -> Result<Vec<String>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(FeedCommand::DesiredSymbols(reply_tx))?;
        reply_rx.await.map_err(|_| AdapterError::WorkerStopped)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch channel that observes every state transition
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn send(&self, command: FeedCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| AdapterError::WorkerStopped)
    }
}

impl UpstreamFeed for PythFeedClient {
    fn subscribe(&self, symbols: Vec<String>) {
        if let Err(e) = self.send(FeedCommand::Subscribe(symbols)) {
            warn!("Dropping upstream subscribe: {}", e);
        }
    }

    fn unsubscribe(&self, symbols: Vec<String>) {
        if let Err(e) = self.send(FeedCommand::Unsubscribe(symbols)) {
            warn!("Dropping upstream unsubscribe: {}", e);
        }
    }

    fn disconnect(&self) {
        if let Err(e) = self.send(FeedCommand::Disconnect) {
            debug!("Upstream already stopped: {}", e);
        }
    }
}

/// Result of one spawned lookup, tagged with the generation it was started under
struct ResolvedBatch {
    generation: u64,
    resolution: Resolution,
}

struct FeedWorker {
    config: PythAdapterConfig,
    resolver: Arc<SymbolResolver>,
    desired: BTreeMap<String, FeedId>,
    /// Symbol to the generation of its in-flight lookup
    pending: HashMap<String, u64>,
    next_generation: u64,
    sink: Option<SplitSink<WsStream, Message>>,
    stream: Option<SplitStream<WsStream>>,
    reconnect_at: Option<Instant>,
    manually_stopped: bool,
    consecutive_failures: u32,
    state: watch::Sender<ConnectionState>,
    ticks: mpsc::UnboundedSender<PriceTick>,
    resolved: mpsc::UnboundedSender<ResolvedBatch>,
}

impl FeedWorker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<FeedCommand>,
        mut resolved: mpsc::UnboundedReceiver<ResolvedBatch>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(batch) = resolved.recv() => {
                    self.apply_resolution(batch).await;
                }
                frame = next_frame(&mut self.stream) => {
                    self.handle_frame(frame).await;
                }
                _ = reconnect_timer(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.open().await;
                }
            }
        }

        self.close_transport().await;
        debug!("Feed worker exiting, all handles dropped");
    }

    async fn handle_command(&mut self, command: FeedCommand) {
        match command {
            FeedCommand::Connect => {
                self.manually_stopped = false;
                if self.sink.is_some() {
                    debug!("Connect requested while already connected");
                    return;
                }
                self.reconnect_at = None;
                self.open().await;
            }
            FeedCommand::Subscribe(symbols) => self.start_resolution(symbols),
            FeedCommand::Unsubscribe(symbols) => self.remove_symbols(symbols).await,
            FeedCommand::Disconnect => {
                self.manually_stopped = true;
                self.reconnect_at = None;
                self.close_transport().await;
                self.set_state(ConnectionState::Stopped);
                info!("Upstream feed stopped");
            }
            FeedCommand::DesiredSymbols(reply) => {
                let _ = reply.send(self.desired.keys().cloned().collect());
            }
        }
    }

    fn start_resolution(&mut self, symbols: Vec<String>) {
        let generation = self.next_generation;
        let mut fresh = Vec::new();
        for symbol in symbols {
            if self.desired.contains_key(&symbol) || self.pending.contains_key(&symbol) {
                continue;
            }
            self.pending.insert(symbol.clone(), generation);
            fresh.push(symbol);
        }

        if fresh.is_empty() {
            return;
        }
        self.next_generation += 1;

        debug!("Resolving {:?} (generation {})", fresh, generation);
        let resolver = self.resolver.clone();
        let results = self.resolved.clone();
        tokio::spawn(async move {
            let resolution = resolver.resolve(&fresh).await;
            let _ = results.send(ResolvedBatch { generation, resolution });
        });
    }

    /// Clear `symbol` from the pending set if `generation` still owns it
    fn settle_pending(&mut self, symbol: &str, generation: u64) -> bool {
        if self.pending.get(symbol) != Some(&generation) {
            return false;
        }
        self.pending.remove(symbol);
        true
    }

    async fn apply_resolution(&mut self, batch: ResolvedBatch) {
        let ResolvedBatch { generation, resolution } = batch;
        let mut ids = Vec::new();

        for identity in resolution.resolved {
            if !self.settle_pending(&identity.symbol, generation) {
                debug!("Discarding stale resolution for {}", identity.symbol);
                continue;
            }
            ids.push(identity.feed_id.clone());
            self.desired.insert(identity.symbol, identity.feed_id);
        }

        for symbol in resolution.failed {
            if self.settle_pending(&symbol, generation) {
                warn!("No upstream feed for {}, it will not receive prices", symbol);
            } else {
                debug!("Discarding stale lookup failure for {}", symbol);
            }
        }

        if !ids.is_empty() && self.sink.is_some() {
            info!("Subscribing to {} upstream feeds", ids.len());
            self.send_request(UpstreamRequest::Subscribe { ids }).await;
        }
    }

    async fn remove_symbols(&mut self, symbols: Vec<String>) {
        let mut ids = Vec::new();
        for symbol in symbols {
            if self.pending.remove(&symbol).is_some() {
                continue;
            }
            if let Some(feed_id) = self.desired.remove(&symbol) {
                ids.push(feed_id);
            }
        }

        if !ids.is_empty() && self.sink.is_some() {
            info!("Unsubscribing from {} upstream feeds", ids.len());
            self.send_request(UpstreamRequest::Unsubscribe { ids }).await;
        }
    }

    async fn open(&mut self) {
        self.set_state(ConnectionState::Connecting);
        let url = self.config.websocket_url.clone();
        info!("Connecting to {}", url);

        let attempt = timeout(self.config.connect_timeout(), connect_async(url.as_str())).await;
        let ws_stream = match attempt {
            Ok(Ok((ws_stream, _))) => ws_stream,
            Ok(Err(e)) => {
                self.connection_lost(AdapterError::ConnectionFailed {
                    url,
                    reason: e.to_string(),
                });
                return;
            }
            Err(_) => {
                self.connection_lost(AdapterError::ConnectionTimeout {
                    url,
                    timeout_ms: self.config.connect_timeout_ms,
                });
                return;
            }
        };

        let (sink, stream) = ws_stream.split();
        self.sink = Some(sink);
        self.stream = Some(stream);
        self.consecutive_failures = 0;
        self.set_state(ConnectionState::Connected);
        info!("✅ Connected to {}", url);

        if !self.desired.is_empty() {
            let ids: Vec<FeedId> = self.desired.values().cloned().collect();
            info!("Resubscribing to {} upstream feeds", ids.len());
            self.send_request(UpstreamRequest::Subscribe { ids }).await;
        }
    }

    async fn handle_frame(&mut self, frame: Option<std::result::Result<Message, tungstenite::Error>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.handle_text(&text),
            Some(Ok(Message::Ping(payload))) => {
                if let Some(sink) = self.sink.as_mut() {
                    if let Err(e) = sink.send(Message::Pong(payload)).await {
                        self.connection_lost(AdapterError::WebSocket(e));
                    }
                }
            }
            Some(Ok(Message::Close(_))) => {
                self.connection_lost(AdapterError::ConnectionLost("closed by server".to_string()));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => self.connection_lost(AdapterError::WebSocket(e)),
            None => {
                self.connection_lost(AdapterError::ConnectionLost("stream ended".to_string()));
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<UpstreamMessage>(text) {
            Ok(UpstreamMessage::PriceUpdate { price_feed }) => self.emit_tick(&price_feed),
            Ok(UpstreamMessage::Response { status, error }) => {
                if status == "success" {
                    debug!("Upstream acknowledged request");
                } else {
                    warn!("Upstream rejected request: {}", error.unwrap_or(status));
                }
            }
            Ok(UpstreamMessage::Other) => debug!("Ignoring upstream frame: {}", text),
            Err(e) => warn!("Dropping malformed upstream frame: {}", e),
        }
    }

    fn emit_tick(&self, update: &PriceFeedUpdate) {
        // Ids missing from the reverse cache belong to in-flight unsubscribe races
        let Some(symbol) = self.resolver.symbol_for(&update.id) else {
            debug!("Dropping tick for unknown feed {}", update.id);
            return;
        };

        match update.to_tick(&symbol) {
            Ok(tick) => {
                if self.ticks.send(tick).is_err() {
                    debug!("Tick receiver dropped");
                }
            }
            Err(e) => warn!("Dropping {} update: {}", symbol, e),
        }
    }

    async fn send_request(&mut self, request: UpstreamRequest) {
        let payload = match serde_json::to_string(&request) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode upstream request: {}", e);
                return;
            }
        };

        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if let Err(e) = sink.send(Message::Text(payload)).await {
            self.connection_lost(AdapterError::WebSocket(e));
        }
    }

    /// Drop the transport and schedule the next attempt unless stopped
    fn connection_lost(&mut self, reason: AdapterError) {
        self.sink = None;
        self.stream = None;

        if self.manually_stopped {
            self.set_state(ConnectionState::Stopped);
            return;
        }

        self.consecutive_failures += 1;
        let delay = self.config.reconnect_delay();
        if self.consecutive_failures >= self.config.reconnect_alert_threshold {
            error!(
                "Upstream unavailable after {} consecutive attempts ({}), retrying in {:?}",
                self.consecutive_failures, reason, delay
            );
        } else {
            warn!("Upstream connection lost ({}), reconnecting in {:?}", reason, delay);
        }

        self.set_state(ConnectionState::Disconnected);
        self.reconnect_at = Some(Instant::now() + delay);
    }

    async fn close_transport(&mut self) {
        self.stream = None;
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                debug!("Error closing upstream socket: {}", e);
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

async fn next_frame(
    stream: &mut Option<SplitStream<WsStream>>,
) -> Option<std::result::Result<Message, tungstenite::Error>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn reconnect_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
