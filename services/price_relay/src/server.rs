//! Relay WebSocket server

use crate::client::serve_connection;
use crate::config::RelayConfig;
use crate::error::{Result, ServiceError};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use pyth_adapter::{FeedLookup, HermesLookup, PythFeedClient, SymbolResolver};
use relay_core::{SubscriptionMultiplexer, UpstreamFeed};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use types::PriceTick;
use warp::{Filter, Rejection, Reply};

/// Main relay server
pub struct RelayServer {
    config: RelayConfig,
    multiplexer: Arc<SubscriptionMultiplexer>,
    upstream: Arc<PythFeedClient>,
    ticks: Option<mpsc::UnboundedReceiver<PriceTick>>,
}

impl RelayServer {
    /// Build a server resolving symbols against the configured Hermes endpoint.
    /// Must be called inside a tokio runtime.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let lookup = HermesLookup::new(&config.upstream.hermes_url, config.upstream.lookup_timeout())?;
        Self::with_lookup(config, Arc::new(lookup))
    }

    pub fn with_lookup(config: RelayConfig, lookup: Arc<dyn FeedLookup>) -> Result<Self> {
        config.validate()?;

        let resolver = Arc::new(SymbolResolver::new(lookup));
        let (upstream, ticks) = PythFeedClient::spawn(config.upstream.clone(), resolver)?;
        let upstream = Arc::new(upstream);

        let feed: Arc<dyn UpstreamFeed> = upstream.clone();
        let multiplexer = Arc::new(SubscriptionMultiplexer::new(feed, config.max_connections));

        Ok(Self {
            config,
            multiplexer,
            upstream,
            ticks: Some(ticks),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn multiplexer(&self) -> &Arc<SubscriptionMultiplexer> {
        &self.multiplexer
    }

    pub fn upstream(&self) -> &Arc<PythFeedClient> {
        &self.upstream
    }

    /// Connect upstream, pin the initial symbols and start fan-out.
    /// Returns the fan-out task.
    pub fn start(&mut self) -> Result<JoinHandle<()>> {
        let ticks = self.ticks.take().ok_or(ServiceError::AlreadyStarted)?;

        info!("Starting price relay");
        self.upstream.connect()?;

        let pinned = self.multiplexer.pin_symbols(&self.config.initial_symbols)?;
        info!("Initial symbols: {:?}", pinned);

        let multiplexer = Arc::clone(&self.multiplexer);
        Ok(tokio::spawn(async move { multiplexer.run(ticks).await }))
    }

    /// Close every peer and stop the upstream
    pub fn stop(&self) {
        info!("Stopping price relay");
        self.multiplexer.shutdown();
    }

    /// HTTP surface: WebSocket upgrade, `/health` and `/status`
    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let multiplexer = Arc::clone(&self.multiplexer);
        let ws_route = warp::path(self.config.ws_path.clone())
            .and(warp::path::end())
            .and(warp::ws())
            .map(move |ws: warp::ws::Ws| {
                let multiplexer = Arc::clone(&multiplexer);
                ws.on_upgrade(move |socket| serve_connection(multiplexer, socket))
            });

        let health_route = warp::get()
            .and(warp::path("health"))
            .and(warp::path::end())
            .map(|| warp::reply::with_status("OK", warp::http::StatusCode::OK));

        let multiplexer = Arc::clone(&self.multiplexer);
        let upstream = Arc::clone(&self.upstream);
        let status_route = warp::get()
            .and(warp::path("status"))
            .and(warp::path::end())
            .map(move || {
                let status = if multiplexer.is_shut_down() { "stopped" } else { "running" };
                warp::reply::json(&serde_json::json!({
                    "status": status,
                    "service": "price-relay",
                    "version": env!("CARGO_PKG_VERSION"),
                    "upstream": upstream.state(),
                    "clients": multiplexer.stats(),
                    "symbols": multiplexer.global_symbols(),
                }))
            });

        ws_route.or(health_route).or(status_route)
    }

    /// Bind `addr` and return the bound address with the serving future.
    /// The future completes once `shutdown` resolves and open requests drain.
    pub fn bind(
        &self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(SocketAddr, BoxFuture<'static, ()>)> {
        let routes = self.routes();

        if self.config.enable_cors {
            let cors_routes = routes.with(warp::cors().allow_any_origin());
            let (bound, server) = warp::serve(cors_routes).try_bind_with_graceful_shutdown(addr, shutdown)?;
            Ok((bound, server.boxed()))
        } else {
            let (bound, server) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown)?;
            Ok((bound, server.boxed()))
        }
    }

    /// Serve on the configured address until `shutdown` resolves, then stop
    pub async fn run(&mut self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = self.config.socket_addr()?;
        let fan_out = self.start()?;

        let (bound, server) = match self.bind(addr, shutdown) {
            Ok(bound) => bound,
            Err(e) => {
                self.stop();
                fan_out.abort();
                return Err(e);
            }
        };

        info!("Price relay listening on ws://{}/{}", bound, self.config.ws_path);
        server.await;

        self.stop();
        fan_out.abort();
        if let Err(e) = fan_out.await {
            if !e.is_cancelled() {
                warn!("Fan-out task ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}
