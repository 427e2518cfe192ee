//! Connected clients and their names.

use crate::error::{RelayError, RelayResult};
use crate::message::Outbound;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Default prefix for generated client names.
pub const DEFAULT_NAME_PREFIX: &str = "Client";

/// One connected participant.
///
/// The client only owns its name and the sending half of its outbound queue.
/// A single writer task drains that queue into the transport, so frames from
/// the client's own loop and from its peer's loop never interleave. The peer
/// link lives in the [`Registry`](crate::registry::Registry).
#[derive(Debug)]
pub struct Client {
    name: String,
    seq: u64,
    outbound: mpsc::Sender<Outbound>,
}

impl Client {
    /// Create a client. `seq` orders clients by join time.
    pub fn new(name: impl Into<String>, seq: u64, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            name: name.into(),
            seq,
            outbound,
        }
    }

    /// Unique name within the hub.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Queue a message for this client's connection.
    ///
    /// Waits for queue capacity. Fails once the connection's writer is gone.
    pub async fn send(&self, msg: Outbound) -> RelayResult<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| RelayError::ChannelClosed(self.name.clone()))
    }

    /// Queue a message without waiting.
    ///
    /// Used for frames relayed from another client's loop, which must not
    /// stall on this client's socket.
    pub fn try_send(&self, msg: Outbound) -> RelayResult<()> {
        self.outbound.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RelayError::QueueFull(self.name.clone()),
            mpsc::error::TrySendError::Closed(_) => RelayError::ChannelClosed(self.name.clone()),
        })
    }

    /// Whether the connection's writer has gone away.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Hands out client names from a counter that never goes backwards, so a name
/// is never reused while the hub lives, even after its owner disconnects.
#[derive(Debug)]
pub struct ClientNamer {
    prefix: String,
    next: AtomicU64,
}

impl ClientNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }

    /// Allocate the next `(seq, name)` pair.
    pub fn next(&self) -> (u64, String) {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        (seq, format!("{}{}", self.prefix, seq))
    }
}

impl Default for ClientNamer {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_PREFIX)
    }
}
