//! Outbound message transport.
//!
//! The protocol layer only ever pushes messages out; it never waits on the
//! channel. [`SyncTransport`] captures that: `send` returns nothing, and a
//! transport that cannot deliver logs and drops the message. Recovery from a
//! lost message is the handshake's job, not the transport's.

use tokio::sync::mpsc;

use crate::crdt::SyncMessage;
use crate::error::Result;

/// Fire-and-forget sink for protocol messages.
pub trait SyncTransport: Send + Sync {
    /// Queue `message` for delivery to the peer.
    fn send(&self, message: SyncMessage);
}

/// Transport backed by an unbounded tokio channel.
///
/// The receiving half is typically drained by a task that writes to a socket,
/// a pipe, or straight into the peer's inbound queue.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<SyncMessage>,
}

impl ChannelTransport {
    /// Create a transport and the receiver for its messages.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl SyncTransport for ChannelTransport {
    fn send(&self, message: SyncMessage) {
        let kind = message.message_type();
        let resource = message.resource().clone();
        if self.tx.send(message).is_err() {
            log::warn!(
                "[Transport] Channel closed, dropping {} for {}",
                kind,
                resource
            );
        }
    }
}

/// Encode a message as one line of JSON, without the trailing newline.
pub fn encode_line(message: &SyncMessage) -> Result<String> {
    message.to_json()
}

/// Decode one line of JSON. Blank lines yield `None`.
pub fn decode_line(line: &str) -> Result<Option<SyncMessage>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    SyncMessage::from_json(line).map(Some)
}
