//! Peer registry: live connection handles, per shard.
//!
//! Uses lock-free DashMap for high-throughput concurrent access. Each shard
//! (and the coordinator, for source peers) owns one registry mapping peer id
//! to the connection's outbound queue, plus a reverse index from app id to
//! the peers it holds, so broadcast fan-out never scans unrelated tenants.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tracing::debug;

/// Handle to one live peer connection.
///
/// The registry exclusively owns these; the durable `peers` row is managed by
/// the connection lifecycle in `ws_server`.
pub struct PeerHandle {
    /// Assigned peer id.
    pub id: String,
    /// Owning app.
    pub app_id: String,
    /// Outbound frame queue, drained by the connection's writer task.
    tx: mpsc::UnboundedSender<Message>,
}

impl PeerHandle {
    pub fn new(id: String, app_id: String, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { id, app_id, tx }
    }

    /// Queue a pre-serialized text frame. Returns `false` when the peer is
    /// dead; the close handler converges durable state, so failures here are
    /// swallowed by fan-out paths.
    pub fn send_text(&self, json: &str) -> bool {
        self.tx.send(Message::Text(json.to_owned().into())).is_ok()
    }

    /// Queue an arbitrary WebSocket message (pong replies, close frames).
    pub fn send_raw(&self, msg: Message) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// Queue a close frame with the given code and reason.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.tx
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.to_owned().into(),
            })))
            .is_ok()
    }
}

/// Lock-free registry of live peers on one shard.
pub struct PeerRegistry {
    /// Peer id → handle.
    peers: DashMap<String, Arc<PeerHandle>>,
    /// App id → peer ids held here (reverse index for broadcast).
    by_app: DashMap<String, DashSet<String>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
            by_app: DashMap::new(),
        }
    }

    /// Record a peer at socket open.
    pub fn register(&self, handle: Arc<PeerHandle>) {
        self.by_app
            .entry(handle.app_id.clone())
            .or_default()
            .insert(handle.id.clone());
        self.peers.insert(handle.id.clone(), handle);
    }

    /// Remove a peer at socket close. Idempotent.
    pub fn unregister(&self, peer_id: &str) {
        if let Some((_, handle)) = self.peers.remove(peer_id) {
            if let Some(set) = self.by_app.get(&handle.app_id) {
                set.remove(peer_id);
            }
        }
    }

    pub fn lookup(&self, peer_id: &str) -> Option<Arc<PeerHandle>> {
        self.peers.get(peer_id).map(|r| r.clone())
    }

    /// Number of live peers on this registry.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Push one pre-serialized frame to a set of peers. Counts deliveries;
    /// peers not held here (or already dead) are skipped.
    pub fn deliver_to_peers(&self, peer_ids: &[String], json: &str) -> usize {
        let mut delivered = 0;
        for peer_id in peer_ids {
            if let Some(handle) = self.peers.get(peer_id) {
                if handle.send_text(json) {
                    delivered += 1;
                } else {
                    debug!(peer_id = %peer_id, "dropping frame for dead peer");
                }
            }
        }
        delivered
    }

    /// Push one pre-serialized frame to every local peer of an app.
    pub fn deliver_app(&self, app_id: &str, json: &str) -> usize {
        let Some(set) = self.by_app.get(app_id) else {
            return 0;
        };
        let mut delivered = 0;
        for peer_id in set.iter() {
            if let Some(handle) = self.peers.get(&*peer_id) {
                if handle.send_text(json) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Close every connection held here. Used by operator drains.
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        let mut closed = 0;
        for entry in self.peers.iter() {
            if entry.value().close(code, reason) {
                closed += 1;
            }
        }
        closed
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
