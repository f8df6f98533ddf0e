//! Client channel binding
//!
//! One `ClientChannel` represents the outbound half of one client
//! connection. Clones share a single unbounded sender, so every message
//! for the connection funnels through one receiver task and per-cmd_id
//! emission order is preserved.

use tokio::sync::mpsc;
use tracing::warn;

use crate::protocol::ServerMessage;

/// Write handle for one client connection
#[derive(Debug, Clone)]
pub struct ClientChannel {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ClientChannel {
    /// Create a channel pair: the write handle and the receiver the
    /// transport drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a message for delivery. Returns false if the client side
    /// has gone away.
    pub fn send(&self, message: ServerMessage) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(err) => {
                warn!(cmd_id = %err.0.cmd_id, "client channel closed, dropping message");
                false
            }
        }
    }

    /// Whether the receiving side has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
