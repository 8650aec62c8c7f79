//! Row types for the store tables.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use common::protocol::ChannelAuthMode;

/// Tenant record. Created and mutated by the external app manager; the core
/// only reads it to authorize connections and requests.
#[derive(Debug, Clone)]
pub struct App {
    pub id: String,
    pub name: String,
    pub secret_key: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Whether a peer publishes or consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    Source,
    Sink,
}

impl PeerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerKind::Source => "source",
            PeerKind::Sink => "sink",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "source" => Some(PeerKind::Source),
            "sink" => Some(PeerKind::Sink),
            _ => None,
        }
    }
}

/// One live connection. A row exists iff the socket is live on some shard.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: String,
    pub app_id: String,
    pub kind: PeerKind,
    pub authenticated_user_id: Option<String>,
    pub user_info: Option<JsonValue>,
}

impl Peer {
    /// The externally visible member id: the authenticated user id when set,
    /// the peer id otherwise.
    pub fn member_id(&self) -> &str {
        self.authenticated_user_id.as_deref().unwrap_or(&self.id)
    }
}

/// Named pub/sub target scoped to one app.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    pub app_id: String,
    pub name: String,
    pub auth_mode: ChannelAuthMode,
    pub store_messages: bool,
}

/// Peer↔channel membership row.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub app_id: String,
    pub peer_id: String,
    pub channel_id: String,
}

/// Persisted channel payload, replayable by its source-assigned id.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub app_id: String,
    pub channel_id: String,
    pub created_at: DateTime<Utc>,
    pub data: JsonValue,
}

/// Coordinator load-table row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardLoad {
    pub id: u64,
    pub connection_count: u64,
}
