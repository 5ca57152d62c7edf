//! Downstream peer handles

use crate::{RelayError, RelayResult};
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use types::DownstreamMessage;
use uuid::Uuid;

/// Identity of one downstream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Reserved id for symbols the relay keeps subscribed on its own behalf.
    /// Never assigned to a real connection.
    pub const PINNED: ClientId = ClientId(Uuid::nil());

    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Outbound half of a downstream peer.
///
/// The transport task owns the receiving end and writes each message to the
/// socket. Once that task is gone every send fails, which is how the multiplexer
/// detects dead peers during fan-out.
#[derive(Debug)]
pub struct DownstreamConnection {
    pub id: ClientId,
    sender: mpsc::UnboundedSender<DownstreamMessage>,
}

impl DownstreamConnection {
    pub fn new(sender: mpsc::UnboundedSender<DownstreamMessage>) -> Self {
        Self {
            id: ClientId::new(),
            sender,
        }
    }

    /// Create a connection together with the receiver its transport drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DownstreamMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, message: DownstreamMessage) -> RelayResult<()> {
        self.sender
            .send(message)
            .map_err(|_| RelayError::SendFailed(self.id))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
