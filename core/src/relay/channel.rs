//! Per-connection send handle
//!
//! Every connection owns exactly one writer task draining a bounded
//! queue into the transport. Anything that wants to talk to a node goes
//! through its [`NodeChannel`], so concurrent senders never interleave
//! frames on the wire.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

/// Transport-neutral frame exchanged with the connection layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One serialized envelope
    Binary(Vec<u8>),
    /// Text frames are not part of the protocol
    Text(String),
    /// Ping/pong and similar transport chatter
    Control,
    /// Close the connection
    Close,
}

/// Process-unique connection identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Channel error types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Send queue full for {0}")]
    QueueFull(ConnectionId),
    #[error("Connection {0} is closed")]
    Closed(ConnectionId),
}

/// Send handle for one connection.
///
/// Clones share the same queue and identity; equality is identity.
#[derive(Clone)]
pub struct NodeChannel {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    shutdown: Arc<Notify>,
}

impl NodeChannel {
    /// Create a channel and the receiving half for its writer task
    pub fn new(queue_depth: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let channel = Self {
            id: ConnectionId::next(),
            tx,
            shutdown: Arc::new(Notify::new()),
        };
        (channel, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue one serialized envelope. Never blocks.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), ChannelError> {
        self.tx.try_send(Frame::Binary(bytes)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::QueueFull(self.id),
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed(self.id),
        })
    }

    /// Ask the owning connection to shut down.
    ///
    /// Queues a close frame (best effort) and wakes the receive loop.
    pub fn close(&self) {
        let _ = self.tx.try_send(Frame::Close);
        self.shutdown.notify_one();
    }

    /// Resolves once [`close`](Self::close) has been called
    pub async fn closed(&self) {
        self.shutdown.notified().await
    }

    /// True if the writer task has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn same_channel(&self, other: &NodeChannel) -> bool {
        self.id == other.id
    }
}

impl PartialEq for NodeChannel {
    fn eq(&self, other: &Self) -> bool {
        self.same_channel(other)
    }
}

impl Eq for NodeChannel {}

impl fmt::Debug for NodeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeChannel").field("id", &self.id).finish()
    }
}
