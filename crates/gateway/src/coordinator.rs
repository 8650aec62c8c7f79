//! Shard coordinator: upgrade dispatch, cross-shard fan-out, load accounting.
//!
//! A singleton per deployment. Sink upgrades are attached to the least-loaded
//! shard under a soft cap, spawning a new shard when every existing one is
//! full. Source (and internal control) connections never leave the
//! coordinator: they register in its own local registry, which participates
//! in fan-out like any shard.
//!
//! The load table is persisted in the store; dispatch reads a snapshot
//! without locking, so counts are advisory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use metrics::gauge;
use tokio::sync::RwLock;
use tracing::{info, warn};

use store::{ShardLoad, Store, StoreError};

use crate::registry::PeerRegistry;
use crate::shard::Shard;

/// Default soft cap on connections per shard (`MAX_CONNECTIONS_PER_OBJECT`).
pub const DEFAULT_MAX_CONNECTIONS_PER_SHARD: usize = 500;

/// Aggregate of one fan-out across all delivery sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutOutcome {
    /// Total frames delivered across every shard and the coordinator.
    pub delivered: usize,
}

impl FanOutOutcome {
    /// The any-wins rule for direct delivery: one shard reaching the
    /// recipient is enough.
    pub fn any(&self) -> bool {
        self.delivered > 0
    }
}

/// The singleton coordinator actor, realized as a lock-protected struct.
pub struct Coordinator {
    store: Store,
    max_connections_per_shard: usize,
    /// Source peers and control connections live here.
    local: PeerRegistry,
    /// Routable handle cache; the durable counts live in the store.
    shards: RwLock<Vec<Arc<Shard>>>,
    next_shard_id: AtomicU64,
}

impl Coordinator {
    pub fn new(store: Store, max_connections_per_shard: usize) -> Self {
        Self {
            store,
            max_connections_per_shard,
            local: PeerRegistry::new(),
            shards: RwLock::new(Vec::new()),
            next_shard_id: AtomicU64::new(1),
        }
    }

    /// The coordinator's own registry (source peers).
    pub fn local(&self) -> &PeerRegistry {
        &self.local
    }

    /// Pick the shard for a new sink connection: minimum connection count at
    /// or under the cap, else allocate a fresh shard.
    pub async fn assign_shard(&self) -> Result<Arc<Shard>, StoreError> {
        let loads = self.store.shard_loads().await?;

        {
            let shards = self.shards.read().await;
            let mut best: Option<(u64, Arc<Shard>)> = None;
            for load in &loads {
                if load.connection_count > self.max_connections_per_shard as u64 {
                    continue;
                }
                let Some(shard) = shards.iter().find(|s| s.id == load.id) else {
                    continue;
                };
                if best
                    .as_ref()
                    .map_or(true, |(count, _)| load.connection_count < *count)
                {
                    best = Some((load.connection_count, shard.clone()));
                }
            }
            if let Some((_, shard)) = best {
                return Ok(shard);
            }
        }

        self.spawn_shard().await
    }

    async fn spawn_shard(&self) -> Result<Arc<Shard>, StoreError> {
        let id = self.next_shard_id.fetch_add(1, Ordering::Relaxed);
        self.store.register_shard(id).await?;

        let shard = Arc::new(Shard::new(id));
        let mut shards = self.shards.write().await;
        shards.push(shard.clone());

        info!(shard_id = id, "spawned worker shard");
        gauge!("sinkr_shard_count").set(shards.len() as f64);
        Ok(shard)
    }

    /// Mirror a shard's connection count into the load table. Advisory:
    /// failures are logged and dispatch keeps using the last snapshot.
    pub async fn report_load(&self, shard: &Shard) {
        let count = shard.connection_count() as u64;
        if let Err(e) = self.store.set_shard_connections(shard.id, count).await {
            warn!(shard_id = shard.id, error = %e, "failed to report shard load");
        }
    }

    /// Fan one pre-serialized frame out to the named peers on every delivery
    /// site in parallel.
    pub async fn deliver_to_peers(&self, peer_ids: &[String], json: &str) -> FanOutOutcome {
        let shards = self.shards.read().await.clone();
        let per_shard = join_all(
            shards
                .iter()
                .map(|shard| shard.deliver_to_peers(peer_ids, json)),
        )
        .await;

        let delivered =
            per_shard.into_iter().sum::<usize>() + self.local.deliver_to_peers(peer_ids, json);
        FanOutOutcome { delivered }
    }

    /// Fan one pre-serialized frame out to every peer of an app, everywhere.
    pub async fn deliver_app(&self, app_id: &str, json: &str) -> FanOutOutcome {
        let shards = self.shards.read().await.clone();
        let per_shard =
            join_all(shards.iter().map(|shard| shard.deliver_app(app_id, json))).await;

        let delivered =
            per_shard.into_iter().sum::<usize>() + self.local.deliver_app(app_id, json);
        FanOutOutcome { delivered }
    }

    /// Load-table snapshot for the control socket.
    pub async fn shard_snapshot(&self) -> Result<Vec<ShardLoad>, StoreError> {
        self.store.shard_loads().await
    }

    /// Live connections across every shard plus the coordinator itself.
    pub async fn total_connections(&self) -> usize {
        let shards = self.shards.read().await;
        shards
            .iter()
            .map(|s| s.connection_count())
            .sum::<usize>()
            + self.local.peer_count()
    }

    /// Number of worker shards currently routable.
    pub async fn shard_count(&self) -> usize {
        self.shards.read().await.len()
    }

    /// Close every socket on one shard. Returns closes queued, or `None` for
    /// an unknown shard id.
    pub async fn drain_shard(&self, shard_id: u64) -> Option<usize> {
        let shards = self.shards.read().await;
        let shard = shards.iter().find(|s| s.id == shard_id)?;
        let closed = shard.drain();
        info!(shard_id, closed, "drained shard");
        Some(closed)
    }
}
