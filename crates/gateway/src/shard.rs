//! Worker shards: peer-owning delivery sites.
//!
//! A shard owns the live sockets the coordinator assigned to it, nothing
//! more; membership and channel state live in the store. On this in-process
//! realization a shard is a registry plus an id, and "invoking" a shard is an
//! async call that pushes frames into its local queues.

use crate::registry::PeerRegistry;

/// Close code used when an operator drains a shard, so clients can tell a
/// server-initiated close from their own normal (1000) close.
pub const DRAIN_CLOSE_CODE: u16 = 1012;

/// One peer-owning worker.
pub struct Shard {
    pub id: u64,
    registry: PeerRegistry,
}

impl Shard {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            registry: PeerRegistry::new(),
        }
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Live connections currently attached here.
    pub fn connection_count(&self) -> usize {
        self.registry.peer_count()
    }

    /// Deliver one frame to the subset of `peer_ids` held on this shard.
    pub async fn deliver_to_peers(&self, peer_ids: &[String], json: &str) -> usize {
        self.registry.deliver_to_peers(peer_ids, json)
    }

    /// Deliver one frame to every peer of an app held on this shard.
    pub async fn deliver_app(&self, app_id: &str, json: &str) -> usize {
        self.registry.deliver_app(app_id, json)
    }

    /// Close every socket on this shard. Returns how many closes were queued.
    pub fn drain(&self) -> usize {
        self.registry.close_all(DRAIN_CLOSE_CODE, "Shard draining")
    }
}
