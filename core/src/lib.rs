// PeroLink core: envelope model and relay
//
// Nodes connect once, authenticate with the shared token, and exchange
// envelopes through the relay. The relay keeps nothing but the live
// set of connections.

pub mod message;
pub mod relay;

pub use message::{decode_envelope, encode_envelope, Envelope, Hello, Payload, Target};
pub use relay::{
    serve_connection, AuthPolicy, AuthToken, Frame, NodeChannel, NodeRegistry, Relay, RelayConfig,
    RelayStats, RouteOutcome,
};
