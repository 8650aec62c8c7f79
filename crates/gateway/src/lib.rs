//! sinkr gateway: the deployment engine of the fan-out service.
//!
//! This crate wires together:
//! - Accepting sink and source WebSocket connections per app
//! - The channel engine (authorization, membership, presence, stored
//!   messages)
//! - The shard coordinator that assigns sinks to worker shards and fans
//!   source requests across all of them
//! - The stateless HTTP source endpoint
//!
//! ## Architecture
//!
//! ```text
//! source (WS or HTTP POST)
//!         ↓
//! dispatch (route union)
//!         ↓
//! ChannelEngine ── Store (SQLite: apps, peers, channels, subscriptions,
//!         ↓                stored messages, shard loads)
//! Coordinator ──→ Shard 1..n (PeerRegistry each)
//!         ↓
//! sink WebSockets
//! ```
//!
//! ## Low-latency design
//!
//! - Lock-free peer registries using DashMap, one per shard
//! - Frames serialized once per fan-out, cloned per socket
//! - Unbounded per-connection queues; a dead queue marks the peer dead and
//!   its close handler converges membership

pub mod channels;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod shard;
pub mod ws_server;

pub use channels::ChannelEngine;
pub use coordinator::{Coordinator, FanOutOutcome, DEFAULT_MAX_CONNECTIONS_PER_SHARD};
pub use error::{GatewayError, Result};
pub use registry::{PeerHandle, PeerRegistry};
pub use shard::{Shard, DRAIN_CLOSE_CODE};
pub use ws_server::{build_state, create_router, AppState, GatewayConfig, OPEN_FAILURE_CLOSE_CODE};
