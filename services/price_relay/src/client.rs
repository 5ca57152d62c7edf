//! Downstream WebSocket connection driver
//!
//! One task per peer. It registers the peer with the multiplexer, then pumps
//! the peer's outbound channel into the socket and feeds parsed requests back.
//! A bad frame is logged and skipped; the connection only ends when the socket
//! closes or errors, or when the multiplexer drops the peer's channel.

use futures_util::{SinkExt, StreamExt};
use relay_core::{ClientId, DownstreamConnection, SubscriptionMultiplexer};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use types::ClientRequest;
use warp::ws::{Message, WebSocket};

pub async fn serve_connection(multiplexer: Arc<SubscriptionMultiplexer>, mut ws: WebSocket) {
    let (connection, mut outbound) = DownstreamConnection::channel();

    let client_id = match multiplexer.on_client_connect(connection) {
        Ok(client_id) => client_id,
        Err(e) => {
            warn!("Rejecting WebSocket connection: {}", e);
            let _ = ws.close().await;
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws.split();

    loop {
        tokio::select! {
            // Handle outgoing messages from the multiplexer
            msg = outbound.recv() => {
                match msg {
                    Some(message) => {
                        let json_str = match serde_json::to_string(&message) {
                            Ok(s) => s,
                            Err(e) => {
                                error!("Failed to serialize message: {}", e);
                                continue;
                            }
                        };

                        if let Err(e) = ws_sender.send(Message::text(json_str)).await {
                            warn!("Failed to send message to client {}: {}", client_id, e);
                            break;
                        }
                    }
                    None => {
                        info!("Message channel closed for client {}", client_id);
                        break;
                    }
                }
            }

            // Handle incoming WebSocket messages
            ws_msg = ws_receiver.next() => {
                match ws_msg {
                    Some(Ok(msg)) => {
                        if msg.is_text() {
                            handle_request(&multiplexer, client_id, msg.to_str().unwrap_or_default());
                        } else if msg.is_close() {
                            info!("Client {} disconnected", client_id);
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for client {}: {}", client_id, e);
                        break;
                    }
                    None => {
                        info!("WebSocket stream closed for client {}", client_id);
                        break;
                    }
                }
            }
        }
    }

    multiplexer.on_client_disconnect(client_id);
    if let Err(e) = ws_sender.close().await {
        debug!("Error closing socket for client {}: {}", client_id, e);
    }
}

fn handle_request(multiplexer: &SubscriptionMultiplexer, client_id: ClientId, text: &str) {
    match serde_json::from_str::<ClientRequest>(text) {
        Ok(ClientRequest::Subscribe { symbols }) => {
            debug!("Client {} requested {:?}", client_id, symbols);
            if let Err(e) = multiplexer.on_client_subscribe(client_id, &symbols) {
                warn!("Subscribe from client {} failed: {}", client_id, e);
            }
        }
        Err(e) => {
            warn!("Ignoring unsupported frame from client {}: {}", client_id, e);
        }
    }
}
