//! Relay Server — per-connection receive loop and envelope dispatch

use super::auth::AuthToken;
use super::channel::{ConnectionId, Frame, NodeChannel};
use super::handshake::{AuthPolicy, HandshakeError, HandshakeHandler};
use super::registry::NodeRegistry;
use super::router::{RouteOutcome, Router};
use crate::message::{decode_envelope, Envelope, Payload};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Token mismatch handling
    pub auth_policy: AuthPolicy,
    /// Close a connection whose node id was taken over by a newer handshake
    pub close_superseded: bool,
    /// Frames buffered per node before sends start failing
    pub outbound_queue_depth: usize,
    /// How long a closing connection may spend flushing its queue
    pub writer_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            auth_policy: AuthPolicy::Enforce,
            close_superseded: true,
            outbound_queue_depth: 256,
            writer_grace: Duration::from_secs(5),
        }
    }
}

/// Statistics about relay operations
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayStats {
    /// Open connections, registered or not
    pub connections_active: usize,
    /// Entries currently in the registry
    pub nodes_registered: usize,
    /// Binary frames received
    pub envelopes_received: u64,
    /// Per-recipient deliveries queued
    pub envelopes_forwarded: u64,
    /// Routable envelopes that reached nobody
    pub envelopes_dropped: u64,
    pub heartbeats_seen: u64,
    pub handshakes_accepted: u64,
    pub handshakes_rejected: u64,
    pub decode_errors: u64,
    /// Bytes written into recipient queues
    pub bytes_relayed: u64,
}

/// Relay error types
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Handshake rejected: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("{connection} does not own node id {source_id:?}")]
    NotRegistered {
        source_id: String,
        connection: ConnectionId,
    },
    #[error("Encode error: {0:#}")]
    Encode(anyhow::Error),
}

/// Connection lifecycle, as seen by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport is up, no accepted handshake yet
    Open,
    /// Handshake accepted under this node id
    Registered(String),
    Closed,
}

/// Relay-side state of one connection
#[derive(Debug)]
pub struct Session {
    channel: NodeChannel,
    state: ConnectionState,
}

impl Session {
    pub fn channel(&self) -> &NodeChannel {
        &self.channel
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.channel.id()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn node_id(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Registered(id) => Some(id),
            _ => None,
        }
    }
}

/// What the receive loop should do after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    Continue,
    Close,
}

/// The relay: registry, handshake handler and router behind one handle
pub struct Relay {
    config: RelayConfig,
    registry: Arc<NodeRegistry>,
    handshake: HandshakeHandler,
    router: Router,
    stats: RwLock<RelayStats>,
}

impl Relay {
    /// Create a relay with its own, empty registry
    pub fn new(config: RelayConfig, secret: AuthToken) -> Self {
        let registry = Arc::new(NodeRegistry::new());
        let handshake = HandshakeHandler::new(
            secret,
            config.auth_policy,
            config.close_superseded,
            registry.clone(),
        );
        let router = Router::new(registry.clone());

        Self {
            config,
            registry,
            handshake,
            router,
            stats: RwLock::new(RelayStats::default()),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Get current relay statistics
    pub fn get_stats(&self) -> RelayStats {
        let mut stats = self.stats.read().clone();
        stats.nodes_registered = self.registry.len();
        stats
    }

    /// Start tracking a freshly accepted connection
    pub fn open_session(&self, channel: NodeChannel) -> Session {
        self.stats.write().connections_active += 1;
        Session {
            channel,
            state: ConnectionState::Open,
        }
    }

    /// Tear down a session; removes whatever the connection registered.
    ///
    /// Safe to call more than once.
    pub fn close_session(&self, session: &mut Session) {
        if session.state == ConnectionState::Closed {
            return;
        }

        for node_id in self.registry.unregister_by_channel(&session.channel) {
            info!("Node {} disconnected", node_id);
        }
        session.state = ConnectionState::Closed;

        let mut stats = self.stats.write();
        stats.connections_active = stats.connections_active.saturating_sub(1);
    }

    /// Process one inbound frame
    pub fn handle_frame(&self, session: &mut Session, frame: Frame) -> FrameAction {
        match frame {
            Frame::Binary(bytes) => self.handle_binary(session, &bytes),
            Frame::Text(_) => {
                warn!("Expected binary message on {}, ignoring text frame", session.connection_id());
                FrameAction::Continue
            }
            Frame::Control => FrameAction::Continue,
            Frame::Close => FrameAction::Close,
        }
    }

    fn handle_binary(&self, session: &mut Session, bytes: &[u8]) -> FrameAction {
        self.stats.write().envelopes_received += 1;

        let envelope = match decode_envelope(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed frame on {}: {:#}", session.connection_id(), e);
                self.stats.write().decode_errors += 1;
                return FrameAction::Continue;
            }
        };

        debug!(
            "Received Envelope: ID={} Source={} Target={} Kind={}",
            envelope.id,
            envelope.source_id,
            envelope.target_id,
            envelope.payload.kind()
        );

        match self.dispatch(session, &envelope, bytes.len()) {
            Ok(()) => FrameAction::Continue,
            Err(RelayError::Handshake(e)) => {
                warn!("Authentication failed on {}: {}", session.connection_id(), e);
                self.stats.write().handshakes_rejected += 1;
                FrameAction::Close
            }
            Err(e) => {
                warn!("Dropping envelope {}: {}", envelope.id, e);
                self.stats.write().envelopes_dropped += 1;
                FrameAction::Continue
            }
        }
    }

    fn dispatch(&self, session: &mut Session, envelope: &Envelope, size: usize) -> Result<(), RelayError> {
        match &envelope.payload {
            Payload::Hello(hello) => {
                self.handshake.handle(&envelope.source_id, hello, &session.channel)?;
                session.state = ConnectionState::Registered(envelope.source_id.clone());
                self.stats.write().handshakes_accepted += 1;
                Ok(())
            }
            Payload::Heartbeat(hb) => {
                debug!(
                    "Heartbeat from {}: seq={} (ts={})",
                    envelope.source_id, hb.seq, envelope.timestamp
                );
                self.stats.write().heartbeats_seen += 1;
                Ok(())
            }
            _ => {
                // Only the connection that owns `source_id` may speak for it
                let owns_source = self
                    .registry
                    .lookup(&envelope.source_id)
                    .is_some_and(|owner| owner.same_channel(&session.channel));
                if !owns_source {
                    return Err(RelayError::NotRegistered {
                        source_id: envelope.source_id.clone(),
                        connection: session.connection_id(),
                    });
                }

                let outcome = self.router.route(envelope).map_err(RelayError::Encode)?;
                self.record_outcome(outcome, size);
                Ok(())
            }
        }
    }

    fn record_outcome(&self, outcome: RouteOutcome, size: usize) {
        let deliveries = outcome.deliveries() as u64;
        let mut stats = self.stats.write();
        stats.envelopes_forwarded += deliveries;
        stats.bytes_relayed += deliveries * size as u64;
        match outcome {
            RouteOutcome::TargetMissing | RouteOutcome::Unicast { delivered: false } => {
                stats.envelopes_dropped += 1;
            }
            _ => {}
        }
    }
}

/// Drive one connection until it closes.
///
/// `inbound` yields frames from the peer; `outbound` is the write half of
/// the transport and is owned by a dedicated writer task. Registry
/// cleanup happens here, whatever ended the loop.
pub async fn serve_connection<S, E, K>(relay: Arc<Relay>, peer: String, mut inbound: S, outbound: K)
where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: fmt::Display,
    K: Sink<Frame> + Unpin + Send + 'static,
    K::Error: fmt::Display + Send,
{
    let (channel, outbox) = NodeChannel::new(relay.config().outbound_queue_depth);
    let shutdown = channel.clone();
    let mut writer = tokio::spawn(write_loop(channel.id(), outbox, outbound));
    let mut session = relay.open_session(channel);

    info!("New connection from {} ({})", peer, session.connection_id());

    loop {
        tokio::select! {
            _ = shutdown.closed() => {
                info!("{} superseded, closing", session.connection_id());
                break;
            }
            next = inbound.next() => match next {
                Some(Ok(frame)) => {
                    if relay.handle_frame(&mut session, frame) == FrameAction::Close {
                        break;
                    }
                }
                Some(Err(e)) => {
                    info!("read error on {}: {}", session.connection_id(), e);
                    break;
                }
                None => break,
            },
        }
    }

    relay.close_session(&mut session);
    info!("Connection from {} closed ({})", peer, session.connection_id());

    // Flush a close frame, then let go of every sender we hold
    shutdown.close();
    drop(shutdown);
    drop(session);

    if tokio::time::timeout(relay.config().writer_grace, &mut writer).await.is_err() {
        writer.abort();
    }
}

async fn write_loop<K>(id: ConnectionId, mut outbox: mpsc::Receiver<Frame>, mut sink: K)
where
    K: Sink<Frame> + Unpin,
    K::Error: fmt::Display,
{
    while let Some(frame) = outbox.recv().await {
        let closing = frame == Frame::Close;
        if let Err(e) = sink.send(frame).await {
            debug!("write error on {}: {}", id, e);
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

// ============================================================================
// TESTS
// ============================================================================
