//! Fan-out of server events to every live connection.
//!
//! Delivery is independent per connection: a recipient whose outbound
//! queue is closed or full is evicted from the registry rather than
//! holding up or losing delivery for anyone else. Evicting an
//! authenticated session changes the online set, so the sweep
//! rebroadcasts presence until a delivery round produces no new deaths;
//! the registry strictly shrinks each round, so this terminates.

use std::sync::Arc;

use tracing::info;

use palaver_core::ids::ConnectionId;
use palaver_core::protocol::ServerFrame;

use crate::presence;
use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver an event to all connections, fire-and-forget.
    pub fn broadcast(&self, frame: &ServerFrame) {
        let Ok(mut payload) = serde_json::to_string(frame) else {
            return;
        };

        loop {
            let dead = self.deliver(&payload);
            if dead.is_empty() {
                return;
            }

            let mut membership_changed = false;
            for id in &dead {
                if self.registry.unregister(id) {
                    membership_changed = true;
                }
                info!(conn_id = %id, "evicted dead connection during broadcast");
            }
            if !membership_changed {
                return;
            }

            let Ok(next) = serde_json::to_string(&presence::presence_frame(&self.registry))
            else {
                return;
            };
            payload = next;
        }
    }

    /// Recompute the online set and broadcast it to everyone.
    pub fn broadcast_presence(&self) {
        self.broadcast(&presence::presence_frame(&self.registry));
    }

    fn deliver(&self, payload: &str) -> Vec<ConnectionId> {
        let mut dead = Vec::new();
        for (id, tx) in self.registry.senders() {
            if tx.try_send(payload.to_string()).is_err() {
                dead.push(id);
            }
        }
        dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Identity;
    use palaver_core::protocol::ServerFrame;
    use tokio::sync::mpsc;

    fn identity(user_id: i64, username: &str) -> Identity {
        Identity {
            user_id,
            username: username.into(),
            is_admin: false,
        }
    }

    fn parse(raw: String) -> ServerFrame {
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn broadcast_reaches_every_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        registry.register(tx_a);
        registry.register(tx_b);

        broadcaster.broadcast(&ServerFrame::error("hello"));

        assert_eq!(parse(rx_a.try_recv().unwrap()), ServerFrame::error("hello"));
        assert_eq!(parse(rx_b.try_recv().unwrap()), ServerFrame::error("hello"));
    }

    #[test]
    fn dead_unauthenticated_connection_is_evicted_silently() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (tx_live, mut rx_live) = mpsc::channel(8);
        registry.register(tx_live);

        let (tx_dead, rx_dead) = mpsc::channel(8);
        registry.register(tx_dead);
        drop(rx_dead);

        broadcaster.broadcast(&ServerFrame::error("ping"));

        assert_eq!(registry.count(), 1);
        // the live connection got the event and nothing else: no presence
        // rebroadcast since the evicted session was never authenticated
        assert_eq!(parse(rx_live.try_recv().unwrap()), ServerFrame::error("ping"));
        assert!(rx_live.try_recv().is_err());
    }

    #[test]
    fn dead_authenticated_connection_triggers_presence_rebroadcast() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (tx_live, mut rx_live) = mpsc::channel(8);
        let live = registry.register(tx_live);
        registry.authenticate(&live, identity(1, "alice")).unwrap();

        let (tx_dead, rx_dead) = mpsc::channel(8);
        let dead = registry.register(tx_dead);
        registry.authenticate(&dead, identity(2, "bob")).unwrap();
        drop(rx_dead);

        broadcaster.broadcast(&ServerFrame::error("ping"));

        assert_eq!(registry.count(), 1);
        assert_eq!(parse(rx_live.try_recv().unwrap()), ServerFrame::error("ping"));
        assert_eq!(
            parse(rx_live.try_recv().unwrap()),
            ServerFrame::Presence {
                online: vec!["alice".into()]
            }
        );
        assert!(rx_live.try_recv().is_err());
    }

    #[test]
    fn full_queue_counts_as_dead() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (tx_stuck, _rx_stuck) = mpsc::channel(1);
        tx_stuck.try_send("backlog".to_string()).unwrap();
        registry.register(tx_stuck);

        let (tx_live, mut rx_live) = mpsc::channel(8);
        registry.register(tx_live);

        broadcaster.broadcast(&ServerFrame::error("ping"));

        assert_eq!(registry.count(), 1);
        assert_eq!(parse(rx_live.try_recv().unwrap()), ServerFrame::error("ping"));
    }

    #[test]
    fn broadcast_presence_reflects_registry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (tx, mut rx) = mpsc::channel(8);
        let id = registry.register(tx);
        registry.authenticate(&id, identity(1, "alice")).unwrap();

        broadcaster.broadcast_presence();
        assert_eq!(
            parse(rx.try_recv().unwrap()),
            ServerFrame::Presence {
                online: vec!["alice".into()]
            }
        );
    }
}
