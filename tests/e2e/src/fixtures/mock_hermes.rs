//! Mock Hermes WebSocket server for testing
//!
//! Accepts any number of stream connections, acknowledges and records every
//! request, and lets a test push price updates or cut every live connection.

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

enum Control {
    Frame(String),
    Drop,
}

#[derive(Default)]
struct MockState {
    /// Parsed requests, one list per accepted connection in accept order
    requests: Vec<Vec<Value>>,
    /// Control channels of connections that are still open
    live: Vec<mpsc::UnboundedSender<Control>>,
}

pub struct MockHermesServer {
    addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
    accept_task: JoinHandle<()>,
}

impl MockHermesServer {
    /// Bind an ephemeral local port and start accepting
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        info!("Mock Hermes server listening on {}", addr);

        let state = Arc::new(Mutex::new(MockState::default()));
        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                debug!("New connection from {}", peer);

                let state = accept_state.clone();
                tokio::spawn(async move {
                    if let Err(e) = Self::handle_connection(stream, state).await {
                        warn!("Connection error: {}", e);
                    }
                });
            }
        });

        Ok(Self {
            addr,
            state,
            accept_task,
        })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn handle_connection(stream: TcpStream, state: Arc<Mutex<MockState>>) -> Result<()> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let index = {
            let mut state = state.lock().await;
            state.requests.push(Vec::new());
            state.live.push(control_tx);
            state.requests.len() - 1
        };

        loop {
            tokio::select! {
                control = control_rx.recv() => match control {
                    Some(Control::Frame(frame)) => ws_sender.send(Message::Text(frame)).await?,
                    // Drop both halves without a close handshake
                    Some(Control::Drop) | None => break,
                },
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received: {}", text);
                        let request: Value = serde_json::from_str(&text)?;
                        state.lock().await.requests[index].push(request);

                        let ack = json!({"type": "response", "status": "success"});
                        ws_sender.send(Message::Text(ack.to_string())).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket connection closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                },
            }
        }

        Ok(())
    }

    /// Number of connections accepted so far, including closed ones
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.requests.len()
    }

    /// Requests received on the `connection`-th accepted connection
    pub async fn requests(&self, connection: usize) -> Vec<Value> {
        self.state
            .lock()
            .await
            .requests
            .get(connection)
            .cloned()
            .unwrap_or_default()
    }

    /// Feed ids a connection is subscribed to after replaying its requests in order
    pub async fn subscribed_ids(&self, connection: usize) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for request in self.requests(connection).await {
            let listed = request["ids"].as_array().cloned().unwrap_or_default();
            for id in listed.iter().filter_map(Value::as_str) {
                match request["type"].as_str() {
                    Some("subscribe") => ids.insert(id.to_string()),
                    Some("unsubscribe") => ids.remove(id),
                    _ => false,
                };
            }
        }
        ids
    }

    /// Every id ever sent in a subscribe request on `connection`, duplicates kept
    pub async fn subscribe_requests(&self, connection: usize) -> Vec<String> {
        self.requests(connection)
            .await
            .iter()
            .filter(|request| request["type"] == "subscribe")
            .flat_map(|request| request["ids"].as_array().cloned().unwrap_or_default())
            .filter_map(|id| id.as_str().map(str::to_string))
            .collect()
    }

    /// Push one price update to every live connection
    pub async fn publish(&self, feed_id: &str, mantissa: &str, expo: i32, publish_time: i64) {
        let frame = json!({
            "type": "price_update",
            "price_feed": {
                "id": feed_id,
                "price": {
                    "price": mantissa,
                    "conf": "1000",
                    "expo": expo,
                    "publish_time": publish_time
                }
            }
        })
        .to_string();

        let state = self.state.lock().await;
        for connection in &state.live {
            let _ = connection.send(Control::Frame(frame.clone()));
        }
    }

    /// Cut every live connection without a close handshake
    pub async fn drop_connections(&self) {
        let mut state = self.state.lock().await;
        for connection in state.live.drain(..) {
            let _ = connection.send(Control::Drop);
        }
    }
}

impl Drop for MockHermesServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
