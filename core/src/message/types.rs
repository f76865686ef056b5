// Envelope types: the unit every node hands to the relay

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved target: fan out to every connected node except the source.
pub const BROADCAST_TARGET: &str = "broadcast";

/// Reserved target: consumed by the relay itself, never forwarded.
pub const MASTER_TARGET: &str = "master";

/// Where an envelope is headed, after resolving the reserved words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    /// Every registered node except the source
    Broadcast,
    /// The local control sink
    Master,
    /// A single named node
    Node(&'a str),
}

impl<'a> Target<'a> {
    pub fn parse(target_id: &'a str) -> Self {
        match target_id {
            BROADCAST_TARGET => Target::Broadcast,
            MASTER_TARGET => Target::Master,
            id => Target::Node(id),
        }
    }
}

/// Check whether an id collides with a reserved target word
pub fn is_reserved_id(id: &str) -> bool {
    id == BROADCAST_TARGET || id == MASTER_TARGET
}

/// Handshake payload. Must be the first thing a node sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Shared secret handed out at relay startup
    pub token: String,
    pub device_name: String,
    pub client_version: String,
    pub platform: String,
    /// Free-form capability tags, e.g. `audio.in`
    pub capabilities: Vec<String>,
}

/// Liveness ping. Observed, never forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Monotonic per sender
    pub seq: u64,
}

/// Outcome carried by an action response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// Final, successful
    Ok,
    /// Final, failed; see `error_msg`
    Error,
    /// Intermediate chunk of a streamed answer
    Partial,
}

/// Payload variants. Only `Hello` and `Heartbeat` mean anything to the
/// relay; the rest are application data and travel untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Hello(Hello),
    Heartbeat(Heartbeat),
    Request {
        action_name: String,
        params: BTreeMap<String, String>,
    },
    Response {
        /// Envelope id of the request being answered
        request_id: String,
        status: ResponseStatus,
        data: String,
        error_msg: String,
    },
    Stream {
        stream_id: String,
        data: Vec<u8>,
        is_end: bool,
        content_type: String,
    },
    /// Opaque application bytes
    Data(Vec<u8>),
}

/// Short payload label for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Hello,
    Heartbeat,
    Request,
    Response,
    Stream,
    Data,
}

impl PayloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadKind::Hello => "hello",
            PayloadKind::Heartbeat => "heartbeat",
            PayloadKind::Request => "request",
            PayloadKind::Response => "response",
            PayloadKind::Stream => "stream",
            PayloadKind::Data => "data",
        }
    }
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Hello(_) => PayloadKind::Hello,
            Payload::Heartbeat(_) => PayloadKind::Heartbeat,
            Payload::Request { .. } => PayloadKind::Request,
            Payload::Response { .. } => PayloadKind::Response,
            Payload::Stream { .. } => PayloadKind::Stream,
            Payload::Data(_) => PayloadKind::Data,
        }
    }

    /// True for relay control traffic (handshake and liveness)
    pub fn is_control(&self) -> bool {
        matches!(self, Payload::Hello(_) | Payload::Heartbeat(_))
    }
}

/// A routed message.
///
/// Immutable once decoded: the relay never rewrites ids or timestamps,
/// it only re-encodes the envelope for forwarding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message ID (UUID v4 when built here; opaque otherwise)
    pub id: String,
    pub source_id: String,
    /// Node id, or one of the reserved targets
    pub target_id: String,
    /// Producer clock, unix milliseconds
    pub timestamp: u64,
    /// Correlation id carried end to end
    pub trace_id: String,
    pub payload: Payload,
}

impl Envelope {
    /// Create a new envelope stamped with a fresh id and the current time
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            timestamp: now_millis(),
            trace_id: String::new(),
            payload,
        }
    }

    /// Handshake envelope addressed to the relay
    pub fn hello(source_id: impl Into<String>, hello: Hello) -> Self {
        Self::new(source_id, MASTER_TARGET, Payload::Hello(hello))
    }

    /// Liveness envelope addressed to the relay
    pub fn heartbeat(source_id: impl Into<String>, seq: u64) -> Self {
        Self::new(source_id, MASTER_TARGET, Payload::Heartbeat(Heartbeat { seq }))
    }

    /// Opaque data envelope
    pub fn data(source_id: impl Into<String>, target_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(source_id, target_id, Payload::Data(bytes))
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn target(&self) -> Target<'_> {
        Target::parse(&self.target_id)
    }
}

impl Hello {
    pub fn new(token: impl Into<String>, device_name: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            device_name: device_name.into(),
            client_version: String::new(),
            platform: platform.into(),
            capabilities: Vec::new(),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parsing() {
        assert_eq!(Target::parse("broadcast"), Target::Broadcast);
        assert_eq!(Target::parse("master"), Target::Master);
        assert_eq!(Target::parse("desktop-1"), Target::Node("desktop-1"));
        // Reserved words are case sensitive on the wire
        assert_eq!(Target::parse("Broadcast"), Target::Node("Broadcast"));
    }

    #[test]
    fn test_reserved_ids() {
        assert!(is_reserved_id("broadcast"));
        assert!(is_reserved_id("master"));
        assert!(!is_reserved_id("node-a"));
        assert!(!is_reserved_id(""));
    }

    #[test]
    fn test_new_envelope_is_stamped() {
        let env = Envelope::data("a", "b", vec![1, 2, 3]);

        assert!(!env.id.is_empty());
        assert!(env.timestamp > 0);
        assert_eq!(env.source_id, "a");
        assert_eq!(env.target(), Target::Node("b"));
        assert_eq!(env.payload.kind(), PayloadKind::Data);
    }

    #[test]
    fn test_control_payloads() {
        let hello = Envelope::hello("a", Hello::new("t", "Desktop", "linux"));
        let hb = Envelope::heartbeat("a", 7);

        assert!(hello.payload.is_control());
        assert!(hb.payload.is_control());
        assert_eq!(hello.target(), Target::Master);
        assert!(!Payload::Data(vec![]).is_control());
    }

    #[test]
    fn test_trace_id_builder() {
        let env = Envelope::data("a", "broadcast", vec![]).with_trace_id("TEST-BROADCAST");
        assert_eq!(env.trace_id, "TEST-BROADCAST");
        assert_eq!(env.target(), Target::Broadcast);
    }
}
