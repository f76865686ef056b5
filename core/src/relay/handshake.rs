//! Handshake handler — validates a Hello and registers the node

use super::auth::AuthToken;
use super::channel::NodeChannel;
use super::registry::{NodeInfo, NodeRegistry};
use crate::message::{is_reserved_id, Hello};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// What to do when a node presents the wrong token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPolicy {
    /// Refuse the handshake and drop the connection
    #[default]
    Enforce,
    /// Log a warning and register anyway. Compatibility only.
    WarnOnly,
}

impl AuthPolicy {
    pub fn from_enforce(enforce_auth: bool) -> Self {
        if enforce_auth {
            AuthPolicy::Enforce
        } else {
            AuthPolicy::WarnOnly
        }
    }
}

/// Handshake error types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Invalid token from {0}")]
    InvalidToken(String),
    #[error("Node id must not be empty")]
    EmptyNodeId,
    #[error("Node id {0:?} is a reserved target")]
    ReservedNodeId(String),
}

/// A successful handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Authenticated,
    /// Token mismatch tolerated by [`AuthPolicy::WarnOnly`]
    AcceptedUnauthenticated,
}

pub struct HandshakeHandler {
    secret: AuthToken,
    policy: AuthPolicy,
    close_superseded: bool,
    registry: Arc<NodeRegistry>,
}

impl HandshakeHandler {
    pub fn new(
        secret: AuthToken,
        policy: AuthPolicy,
        close_superseded: bool,
        registry: Arc<NodeRegistry>,
    ) -> Self {
        Self {
            secret,
            policy,
            close_superseded,
            registry,
        }
    }

    pub fn policy(&self) -> AuthPolicy {
        self.policy
    }

    /// Validate `hello` from `source_id` and register `channel` under it.
    ///
    /// On error nothing is registered and the caller should close the
    /// connection.
    pub fn handle(
        &self,
        source_id: &str,
        hello: &Hello,
        channel: &NodeChannel,
    ) -> Result<HandshakeOutcome, HandshakeError> {
        info!(
            "Hello from {} (Device: {}, Platform: {}, Version: {})",
            source_id, hello.device_name, hello.platform, hello.client_version
        );

        if source_id.is_empty() {
            return Err(HandshakeError::EmptyNodeId);
        }
        if is_reserved_id(source_id) {
            return Err(HandshakeError::ReservedNodeId(source_id.to_string()));
        }

        let outcome = if self.secret.matches(&hello.token) {
            HandshakeOutcome::Authenticated
        } else {
            match self.policy {
                AuthPolicy::Enforce => {
                    return Err(HandshakeError::InvalidToken(source_id.to_string()));
                }
                AuthPolicy::WarnOnly => {
                    warn!(
                        "Invalid token from {}, registering anyway (enforce_auth = false)",
                        source_id
                    );
                    HandshakeOutcome::AcceptedUnauthenticated
                }
            }
        };

        // Re-handshake under a new id: drop the old alias first
        for old_id in self.registry.unregister_by_channel(channel) {
            if old_id != source_id {
                info!("{} renamed {} -> {}", channel.id(), old_id, source_id);
            }
        }

        let node_info = NodeInfo {
            device_name: hello.device_name.clone(),
            platform: hello.platform.clone(),
            client_version: hello.client_version.clone(),
            capabilities: hello.capabilities.clone(),
            registered_at: crate::message::types::now_millis(),
            authenticated: outcome == HandshakeOutcome::Authenticated,
        };

        if let Some(previous) = self
            .registry
            .register(source_id.to_string(), channel.clone(), node_info)
        {
            if !previous.channel.same_channel(channel) {
                info!(
                    "Node {} superseded: {} replaces {}",
                    source_id,
                    channel.id(),
                    previous.channel.id()
                );
                if self.close_superseded {
                    previous.channel.close();
                }
            }
        }

        info!("Node {} registered on {}", source_id, channel.id());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::channel::Frame;

    fn handler(policy: AuthPolicy) -> (HandshakeHandler, Arc<NodeRegistry>) {
        let registry = Arc::new(NodeRegistry::new());
        let handler = HandshakeHandler::new(
            AuthToken::from_string("T"),
            policy,
            true,
            registry.clone(),
        );
        (handler, registry)
    }

    fn hello(token: &str) -> Hello {
        Hello::new(token, "Desktop", "linux")
    }

    #[test]
    fn test_valid_token_registers() {
        let (handler, registry) = handler(AuthPolicy::Enforce);
        let (channel, _rx) = NodeChannel::new(4);

        let outcome = handler.handle("a", &hello("T"), &channel).unwrap();

        assert_eq!(outcome, HandshakeOutcome::Authenticated);
        assert_eq!(registry.lookup("a"), Some(channel));
        assert!(registry.summaries()[0].info.authenticated);
    }

    #[test]
    fn test_invalid_token_rejected_by_default() {
        let (handler, registry) = handler(AuthPolicy::default());
        let (channel, _rx) = NodeChannel::new(4);

        let result = handler.handle("a", &hello("wrong"), &channel);

        assert_eq!(result, Err(HandshakeError::InvalidToken("a".into())));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_warn_only_registers_unauthenticated() {
        let (handler, registry) = handler(AuthPolicy::WarnOnly);
        let (channel, _rx) = NodeChannel::new(4);

        let outcome = handler.handle("a", &hello("wrong"), &channel).unwrap();

        assert_eq!(outcome, HandshakeOutcome::AcceptedUnauthenticated);
        assert!(registry.contains("a"));
        assert!(!registry.summaries()[0].info.authenticated);
    }

    #[test]
    fn test_reserved_and_empty_ids_rejected() {
        let (handler, registry) = handler(AuthPolicy::WarnOnly);
        let (channel, _rx) = NodeChannel::new(4);

        assert_eq!(
            handler.handle("broadcast", &hello("T"), &channel),
            Err(HandshakeError::ReservedNodeId("broadcast".into()))
        );
        assert_eq!(
            handler.handle("master", &hello("T"), &channel),
            Err(HandshakeError::ReservedNodeId("master".into()))
        );
        assert_eq!(
            handler.handle("", &hello("T"), &channel),
            Err(HandshakeError::EmptyNodeId)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_superseded_connection_is_closed() {
        let (handler, registry) = handler(AuthPolicy::Enforce);
        let (first, mut first_rx) = NodeChannel::new(4);
        let (second, _second_rx) = NodeChannel::new(4);

        handler.handle("a", &hello("T"), &first).unwrap();
        handler.handle("a", &hello("T"), &second).unwrap();

        assert_eq!(registry.lookup("a"), Some(second));
        assert_eq!(first_rx.try_recv().unwrap(), Frame::Close);
    }

    #[test]
    fn test_superseded_connection_left_open_when_disabled() {
        let registry = Arc::new(NodeRegistry::new());
        let handler =
            HandshakeHandler::new(AuthToken::from_string("T"), AuthPolicy::Enforce, false, registry);
        let (first, mut first_rx) = NodeChannel::new(4);
        let (second, _second_rx) = NodeChannel::new(4);

        handler.handle("a", &hello("T"), &first).unwrap();
        handler.handle("a", &hello("T"), &second).unwrap();

        assert!(first_rx.try_recv().is_err());
    }

    #[test]
    fn test_rehandshake_under_new_id_drops_alias() {
        let (handler, registry) = handler(AuthPolicy::Enforce);
        let (channel, mut rx) = NodeChannel::new(4);

        handler.handle("a", &hello("T"), &channel).unwrap();
        handler.handle("b", &hello("T"), &channel).unwrap();

        assert!(!registry.contains("a"));
        assert_eq!(registry.lookup("b"), Some(channel));
        // Same connection re-registering never closes itself
        assert!(rx.try_recv().is_err());
    }
}
