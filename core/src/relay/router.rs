//! Router — broadcast, unicast, or keep

use super::registry::NodeRegistry;
use crate::message::{encode_envelope, Envelope, Target};
use std::sync::Arc;
use tracing::{debug, warn};

/// What the router did with an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Fan-out finished; per-recipient failures were logged
    Broadcast { delivered: usize, failed: usize },
    /// Single recipient found; `delivered` is false if its queue refused the frame
    Unicast { delivered: bool },
    /// Addressed to `master`: kept by the relay
    LocalSink,
    /// Unicast target not registered
    TargetMissing,
    /// Control payload, never forwarded
    Suppressed,
}

impl RouteOutcome {
    /// Number of recipient queues that accepted the envelope
    pub fn deliveries(&self) -> usize {
        match self {
            RouteOutcome::Broadcast { delivered, .. } => *delivered,
            RouteOutcome::Unicast { delivered: true } => 1,
            _ => 0,
        }
    }
}

pub struct Router {
    registry: Arc<NodeRegistry>,
}

impl Router {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Route one decoded envelope.
    ///
    /// Errors only if the envelope cannot be re-encoded; delivery
    /// problems are logged and reported through the outcome.
    pub fn route(&self, envelope: &Envelope) -> anyhow::Result<RouteOutcome> {
        if envelope.payload.is_control() {
            return Ok(RouteOutcome::Suppressed);
        }

        match envelope.target() {
            Target::Broadcast => self.broadcast(envelope),
            Target::Master => {
                debug!("Envelope {} for master kept locally", envelope.id);
                Ok(RouteOutcome::LocalSink)
            }
            Target::Node(target_id) => self.unicast(envelope, target_id),
        }
    }

    fn broadcast(&self, envelope: &Envelope) -> anyhow::Result<RouteOutcome> {
        let recipients = self.registry.snapshot_all();
        let data = encode_envelope(envelope)?;

        let mut delivered = 0;
        let mut failed = 0;
        for (id, channel) in recipients {
            if id == envelope.source_id {
                continue; // Don't echo back to sender
            }

            match channel.send(data.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    // Cleanup belongs to the recipient's own connection loop
                    warn!("Error sending to {}: {}", id, e);
                    failed += 1;
                }
            }
        }

        debug!(
            "Broadcast {} from {}: {} delivered, {} failed",
            envelope.id, envelope.source_id, delivered, failed
        );
        Ok(RouteOutcome::Broadcast { delivered, failed })
    }

    fn unicast(&self, envelope: &Envelope, target_id: &str) -> anyhow::Result<RouteOutcome> {
        let Some(channel) = self.registry.lookup(target_id) else {
            warn!("Target node {} not found, dropping {}", target_id, envelope.id);
            return Ok(RouteOutcome::TargetMissing);
        };

        let data = encode_envelope(envelope)?;
        match channel.send(data) {
            Ok(()) => Ok(RouteOutcome::Unicast { delivered: true }),
            Err(e) => {
                warn!("Error sending to {}: {}", target_id, e);
                Ok(RouteOutcome::Unicast { delivered: false })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::decode_envelope;
    use crate::relay::channel::{Frame, NodeChannel};
    use crate::relay::registry::NodeInfo;
    use tokio::sync::mpsc;

    struct Fixture {
        router: Router,
        registry: Arc<NodeRegistry>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(NodeRegistry::new());
        Fixture {
            router: Router::new(registry.clone()),
            registry,
        }
    }

    impl Fixture {
        fn join(&self, id: &str) -> mpsc::Receiver<Frame> {
            let (channel, rx) = NodeChannel::new(8);
            self.registry.register(id.into(), channel, NodeInfo::default());
            rx
        }
    }

    fn received(rx: &mut mpsc::Receiver<Frame>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Frame::Binary(bytes) = frame {
                out.push(decode_envelope(&bytes).unwrap());
            }
        }
        out
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let f = fixture();
        let mut a = f.join("A");
        let mut b = f.join("B");
        let mut c = f.join("C");

        let env = Envelope::data("A", "broadcast", b"hi".to_vec());
        let outcome = f.router.route(&env).unwrap();

        assert_eq!(outcome, RouteOutcome::Broadcast { delivered: 2, failed: 0 });
        assert!(received(&mut a).is_empty());
        assert_eq!(received(&mut b), vec![env.clone()]);
        assert_eq!(received(&mut c), vec![env]);
    }

    #[test]
    fn test_broadcast_continues_past_failures() {
        let f = fixture();
        let dead = f.join("dead");
        drop(dead);
        let mut b = f.join("B");

        let env = Envelope::data("A", "broadcast", vec![]);
        let outcome = f.router.route(&env).unwrap();

        assert_eq!(outcome, RouteOutcome::Broadcast { delivered: 1, failed: 1 });
        assert_eq!(received(&mut b).len(), 1);
        // Router never mutates the registry
        assert!(f.registry.contains("dead"));
    }

    #[test]
    fn test_unicast_reaches_only_target() {
        let f = fixture();
        let mut a = f.join("A");
        let mut b = f.join("B");

        let env = Envelope::data("A", "B", b"direct".to_vec());
        assert_eq!(f.router.route(&env).unwrap(), RouteOutcome::Unicast { delivered: true });

        let got = received(&mut b);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].source_id, "A");
        assert!(received(&mut a).is_empty());
    }

    #[test]
    fn test_unicast_to_missing_target_is_noop() {
        let f = fixture();
        let mut a = f.join("A");

        let env = Envelope::data("A", "nonexistent", vec![]);
        assert_eq!(f.router.route(&env).unwrap(), RouteOutcome::TargetMissing);
        assert!(received(&mut a).is_empty());
    }

    #[test]
    fn test_unicast_write_failure_is_not_escalated() {
        let f = fixture();
        drop(f.join("B"));

        let env = Envelope::data("A", "B", vec![]);
        assert_eq!(f.router.route(&env).unwrap(), RouteOutcome::Unicast { delivered: false });
    }

    #[test]
    fn test_master_is_never_forwarded() {
        let f = fixture();
        let mut a = f.join("A");
        let mut b = f.join("B");

        let env = Envelope::data("A", "master", vec![]);
        assert_eq!(f.router.route(&env).unwrap(), RouteOutcome::LocalSink);
        assert!(received(&mut a).is_empty());
        assert!(received(&mut b).is_empty());
    }

    #[test]
    fn test_heartbeat_is_never_forwarded() {
        let f = fixture();
        let mut b = f.join("B");

        let mut env = Envelope::heartbeat("A", 1);
        for target in ["broadcast", "B", "master"] {
            env.target_id = target.to_string();
            assert_eq!(f.router.route(&env).unwrap(), RouteOutcome::Suppressed);
        }
        assert!(received(&mut b).is_empty());
    }

    #[test]
    fn test_deliveries_count() {
        assert_eq!(RouteOutcome::Broadcast { delivered: 3, failed: 1 }.deliveries(), 3);
        assert_eq!(RouteOutcome::Unicast { delivered: true }.deliveries(), 1);
        assert_eq!(RouteOutcome::Unicast { delivered: false }.deliveries(), 0);
        assert_eq!(RouteOutcome::TargetMissing.deliveries(), 0);
    }
}
