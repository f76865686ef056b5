//! Relay — node registry, handshake, routing and the connection loop
//!
//! Nodes connect, say Hello once, and from then on every envelope they
//! send is fanned out, delivered to one node, or kept by the relay.

pub mod auth;
pub mod channel;
pub mod handshake;
pub mod registry;
pub mod router;
pub mod server;

pub use auth::AuthToken;
pub use channel::{ChannelError, ConnectionId, Frame, NodeChannel};
pub use handshake::{AuthPolicy, HandshakeError, HandshakeHandler, HandshakeOutcome};
pub use registry::{NodeEntry, NodeInfo, NodeRegistry, NodeSummary};
pub use router::{RouteOutcome, Router};
pub use server::{
    serve_connection, ConnectionState, FrameAction, Relay, RelayConfig, RelayError, RelayStats,
    Session,
};
