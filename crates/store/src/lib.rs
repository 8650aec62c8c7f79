//! Tenant and membership store.
//!
//! SQLite-backed durable state shared by the coordinator and every worker
//! shard: apps, peers, channels, subscriptions, stored channel messages, and
//! the coordinator's shard load table. A single connection lives behind a
//! `tokio::sync::Mutex`, so every operation is an async suspension point and
//! writes serialize naturally.
//!
//! Uniqueness invariants — `(app, name)` on channels and
//! `(app, peer, channel)` on subscriptions — are enforced by the schema, and
//! deletes cascade through foreign keys.

pub mod apps;
pub mod channels;
pub mod database;
pub mod error;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod peers;
pub mod shards;
pub mod subscriptions;

pub use database::Store;
pub use error::{Result, StoreError};
pub use models::{App, Channel, Peer, PeerKind, ShardLoad, StoredMessage, Subscription};
pub use subscriptions::SubscribeOutcome;
