//! End-to-end relay tests
//!
//! Each test runs a real relay on an ephemeral port against the mock Hermes
//! stream and talks to it over WebSocket like a browser client would.

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use price_relay::{RelayConfig, RelayServer};
use price_relay_e2e_tests::fixtures::static_lookup::{BTC_ID, ETH_ID, JUP_ID, SOL_ID, WBTC_ID};
use price_relay_e2e_tests::{init_tracing, wait_until, MockHermesServer, StaticLookup};
use pyth_adapter::{ConnectionState, PythAdapterConfig};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct Relay {
    hermes: MockHermesServer,
    server: RelayServer,
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    serving: JoinHandle<()>,
    fan_out: JoinHandle<()>,
}

impl Relay {
    async fn start(initial_symbols: &[&str], reconnect_delay_ms: u64) -> Result<Self> {
        init_tracing();
        let hermes = MockHermesServer::start().await?;

        let config = RelayConfig {
            port: 0,
            initial_symbols: initial_symbols.iter().map(|s| s.to_string()).collect(),
            upstream: PythAdapterConfig {
                websocket_url: hermes.ws_url(),
                reconnect_delay_ms,
                connect_timeout_ms: 2000,
                ..Default::default()
            },
            ..Default::default()
        };

        let mut server = RelayServer::with_lookup(config, Arc::new(StaticLookup::pyth()))?;
        let fan_out = server.start()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (addr, serving) = server.bind(server.config().socket_addr()?, async move {
            let _ = shutdown_rx.await;
        })?;
        let serving = tokio::spawn(serving);

        Ok(Self {
            hermes,
            server,
            addr,
            shutdown: Some(shutdown_tx),
            serving,
            fan_out,
        })
    }

    /// Open a downstream connection and consume the greeting
    async fn connect(&self) -> Result<Client> {
        let (mut client, _) = connect_async(format!("ws://{}/ws", self.addr)).await?;
        let greeting = recv_json(&mut client).await?;
        assert_eq!(greeting, json!({"type": "connected", "message": "Ready for pricing"}));
        Ok(client)
    }

    /// Wait until the `connection`-th upstream connection holds exactly `ids`
    async fn wait_for_upstream(&self, connection: usize, ids: &[&str]) -> Result<()> {
        let expected: BTreeSet<String> = ids.iter().map(|id| id.to_string()).collect();
        let (hermes, expected) = (&self.hermes, &expected);
        wait_until(WAIT, || async move { hermes.subscribed_ids(connection).await == *expected }).await
    }

    async fn stop(mut self) {
        self.server.stop();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = tokio::time::timeout(WAIT, &mut self.serving).await;
        self.fan_out.abort();
    }
}

async fn subscribe(client: &mut Client, symbols: &[&str]) -> Result<Value> {
    let request = json!({"type": "subscribe", "symbols": symbols});
    client.send(Message::Text(request.to_string())).await?;

    let confirmed = recv_json(client).await?;
    assert_eq!(confirmed["type"], "subscription_confirmed");
    Ok(confirmed["symbols"].clone())
}

/// Next text frame as JSON, skipping control frames
async fn recv_json(client: &mut Client) -> Result<Value> {
    loop {
        let frame = tokio::time::timeout(WAIT, client.next())
            .await
            .map_err(|_| anyhow!("timed out waiting for a frame"))?
            .ok_or_else(|| anyhow!("connection closed"))??;

        match frame {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            Message::Close(_) => return Err(anyhow!("connection closed")),
            _ => continue,
        }
    }
}

fn assert_price(update: &Value, symbol: &str, price: f64, timestamp: i64) {
    assert_eq!(update["type"], "price_update", "unexpected frame {update}");
    assert_eq!(update["data"]["symbol"], symbol);
    let actual = update["data"]["price"].as_f64().unwrap();
    assert!((actual - price).abs() < 1e-9, "expected {price}, got {actual}");
    assert_eq!(update["data"]["timestamp"], timestamp);
}

#[tokio::test]
async fn test_full_pipeline_delivers_decoded_prices() -> Result<()> {
    let relay = Relay::start(&[], 100).await?;
    let mut client = relay.connect().await?;

    let confirmed = subscribe(&mut client, &["btc", "ETH-PERP"]).await?;
    assert_eq!(confirmed, json!(["BTC", "ETH"]));
    relay.wait_for_upstream(0, &[BTC_ID, ETH_ID]).await?;

    relay.hermes.publish(BTC_ID, "6425012345678", -8, 1_700_000_000).await;
    let update = recv_json(&mut client).await?;
    assert_price(&update, "BTC", 64250.1235, 1_700_000_000_000);

    relay.hermes.publish(ETH_ID, "345067", -2, 1_700_000_001).await;
    let update = recv_json(&mut client).await?;
    assert_price(&update, "ETH", 3450.67, 1_700_000_001_000);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_lookalike_feed_is_never_relayed() -> Result<()> {
    let relay = Relay::start(&[], 100).await?;
    let mut client = relay.connect().await?;

    subscribe(&mut client, &["BTC"]).await?;
    relay.wait_for_upstream(0, &[BTC_ID]).await?;
    assert!(!relay.hermes.subscribe_requests(0).await.contains(&WBTC_ID.to_string()));

    // WBTC was never resolved, so its frames have no symbol to fan out to
    relay.hermes.publish(WBTC_ID, "6400000000000", -8, 1_700_000_000).await;
    relay.hermes.publish(BTC_ID, "6425000000000", -8, 1_700_000_002).await;

    let update = recv_json(&mut client).await?;
    assert_price(&update, "BTC", 64250.0, 1_700_000_002_000);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_shared_symbol_subscribed_once_and_released_by_last_holder() -> Result<()> {
    let relay = Relay::start(&[], 100).await?;
    let mut first = relay.connect().await?;
    let mut second = relay.connect().await?;

    subscribe(&mut first, &["SOL"]).await?;
    relay.wait_for_upstream(0, &[SOL_ID]).await?;
    subscribe(&mut second, &["sol"]).await?;
    assert_eq!(relay.server.multiplexer().reference_count("SOL"), 2);

    relay.hermes.publish(SOL_ID, "14523000000", -8, 1_700_000_000).await;
    assert_price(&recv_json(&mut first).await?, "SOL", 145.23, 1_700_000_000_000);
    assert_price(&recv_json(&mut second).await?, "SOL", 145.23, 1_700_000_000_000);

    assert_eq!(relay.hermes.subscribe_requests(0).await, vec![SOL_ID.to_string()]);

    let multiplexer = relay.server.multiplexer();
    first.close(None).await?;
    wait_until(WAIT, || async move { multiplexer.client_count() == 1 }).await?;
    assert_eq!(relay.hermes.subscribed_ids(0).await.len(), 1);

    second.close(None).await?;
    relay.wait_for_upstream(0, &[]).await?;
    assert!(relay.server.multiplexer().global_symbols().is_empty());

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_upstream_drop_resubscribes_desired_set() -> Result<()> {
    let relay = Relay::start(&["SOL"], 100).await?;
    let mut client = relay.connect().await?;

    subscribe(&mut client, &["BTC"]).await?;
    relay.wait_for_upstream(0, &[SOL_ID, BTC_ID]).await?;

    let hermes = &relay.hermes;
    hermes.drop_connections().await;
    wait_until(WAIT, || async move { hermes.connection_count().await == 2 }).await?;
    relay.wait_for_upstream(1, &[SOL_ID, BTC_ID]).await?;

    let mut resubscribed = relay.hermes.subscribe_requests(1).await;
    resubscribed.sort();
    let mut expected = vec![BTC_ID.to_string(), SOL_ID.to_string()];
    expected.sort();
    assert_eq!(resubscribed, expected);

    // The downstream client never resubscribed
    relay.hermes.publish(BTC_ID, "6500000000000", -8, 1_700_000_100).await;
    assert_price(&recv_json(&mut client).await?, "BTC", 65000.0, 1_700_000_100_000);
    assert_eq!(relay.server.multiplexer().client_count(), 1);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_while_disconnected_is_not_resubscribed() -> Result<()> {
    let relay = Relay::start(&[], 1500).await?;
    let mut keeper = relay.connect().await?;
    let mut leaver = relay.connect().await?;

    subscribe(&mut keeper, &["BTC"]).await?;
    subscribe(&mut leaver, &["ETH"]).await?;
    relay.wait_for_upstream(0, &[BTC_ID, ETH_ID]).await?;

    let (hermes, upstream, multiplexer) = (&relay.hermes, relay.server.upstream(), relay.server.multiplexer());
    hermes.drop_connections().await;
    wait_until(WAIT, || async move { !upstream.is_connected() }).await?;

    leaver.close(None).await?;
    wait_until(WAIT, || async move { multiplexer.reference_count("ETH") == 0 }).await?;
    assert_eq!(upstream.desired_symbols().await?, vec!["BTC".to_string()]);

    wait_until(WAIT, || async move { hermes.connection_count().await == 2 }).await?;
    relay.wait_for_upstream(1, &[BTC_ID]).await?;
    assert_eq!(upstream.state(), ConnectionState::Connected);

    relay.hermes.publish(BTC_ID, "6600000000000", -8, 1_700_000_200).await;
    assert_price(&recv_json(&mut keeper).await?, "BTC", 66000.0, 1_700_000_200_000);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_subscribe_while_disconnected_is_sent_once_on_reconnect() -> Result<()> {
    let relay = Relay::start(&["SOL"], 1500).await?;
    let mut client = relay.connect().await?;

    subscribe(&mut client, &["BTC"]).await?;
    relay.wait_for_upstream(0, &[SOL_ID, BTC_ID]).await?;

    let (hermes, upstream) = (&relay.hermes, relay.server.upstream());
    hermes.drop_connections().await;
    wait_until(WAIT, || async move { !upstream.is_connected() }).await?;

    subscribe(&mut client, &["ETH"]).await?;
    wait_until(WAIT, || async move {
        upstream.desired_symbols().await.map(|symbols| symbols.contains(&"ETH".to_string())).unwrap_or(false)
    })
    .await?;
    assert_eq!(hermes.connection_count().await, 1);

    wait_until(WAIT, || async move { hermes.connection_count().await == 2 }).await?;
    relay.wait_for_upstream(1, &[SOL_ID, BTC_ID, ETH_ID]).await?;

    let mut resubscribed = relay.hermes.subscribe_requests(1).await;
    resubscribed.sort();
    let mut expected = vec![BTC_ID.to_string(), ETH_ID.to_string(), SOL_ID.to_string()];
    expected.sort();
    assert_eq!(resubscribed, expected);

    relay.hermes.publish(ETH_ID, "351000", -2, 1_700_000_250).await;
    assert_price(&recv_json(&mut client).await?, "ETH", 3510.0, 1_700_000_250_000);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_partial_resolution_keeps_resolvable_symbols() -> Result<()> {
    let relay = Relay::start(&[], 100).await?;
    let mut client = relay.connect().await?;

    let confirmed = subscribe(&mut client, &["BTC", "NOTASYMBOL", "ETH"]).await?;
    assert_eq!(confirmed, json!(["BTC", "ETH", "NOTASYMBOL"]));
    relay.wait_for_upstream(0, &[BTC_ID, ETH_ID]).await?;

    relay.hermes.publish(ETH_ID, "350000", -2, 1_700_000_300).await;
    assert_price(&recv_json(&mut client).await?, "ETH", 3500.0, 1_700_000_300_000);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_stop_closes_clients_and_upstream() -> Result<()> {
    let relay = Relay::start(&["JUP"], 100).await?;
    let mut client = relay.connect().await?;
    subscribe(&mut client, &["BTC"]).await?;
    relay.wait_for_upstream(0, &[BTC_ID, JUP_ID]).await?;

    let upstream = relay.server.upstream();
    relay.server.stop();

    assert!(recv_json(&mut client).await.is_err());
    let mut states = upstream.state_changes();
    tokio::time::timeout(WAIT, states.wait_for(|state| *state == ConnectionState::Stopped)).await??;

    assert!(relay.server.multiplexer().is_shut_down());
    assert_eq!(relay.server.multiplexer().client_count(), 0);

    // A stopped relay turns new peers away
    assert!(relay.connect().await.is_err());

    relay.stop().await;
    Ok(())
}
