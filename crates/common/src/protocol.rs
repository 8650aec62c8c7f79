//! Server→sink frame types and shared protocol primitives.
//!
//! Defines the JSON frame format pushed to sink WebSockets, discriminated by
//! `source` ("metadata" or "message"), plus the small set of frames a sink is
//! allowed to send back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ============================================================================
// Shared primitives
// ============================================================================

/// Channel authorization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelAuthMode {
    /// Anyone connected to the app may subscribe.
    Public,
    /// Subscription requires an authenticated peer.
    Private,
    /// Like private, but member identities and `userInfo` are visible.
    Presence,
}

impl ChannelAuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelAuthMode::Public => "public",
            ChannelAuthMode::Private => "private",
            ChannelAuthMode::Presence => "presence",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(ChannelAuthMode::Public),
            "private" => Some(ChannelAuthMode::Private),
            "presence" => Some(ChannelAuthMode::Presence),
            _ => None,
        }
    }

    /// Whether subscribing requires `authenticatedUserId` to be set.
    pub fn requires_authentication(&self) -> bool {
        matches!(self, ChannelAuthMode::Private | ChannelAuthMode::Presence)
    }

    /// Whether member `userInfo` is exposed in membership frames.
    pub fn exposes_user_info(&self) -> bool {
        matches!(self, ChannelAuthMode::Presence)
    }
}

impl std::fmt::Display for ChannelAuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message payload, tagged as a whole message or one chunk of a larger one.
///
/// The server never reassembles chunks; the tag and index pass through to the
/// receiving sink verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePayload {
    Plain { message: JsonValue },
    Chunk { index: u64, message: JsonValue },
}

// ============================================================================
// Server → Sink frames
// ============================================================================

/// A frame pushed to a sink WebSocket.
///
/// `id` correlates with the source envelope for message frames; metadata
/// frames carry a fresh id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkFrame {
    pub id: String,
    #[serde(flatten)]
    pub body: SinkFrameBody,
}

/// Frame body, discriminated by `source`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", content = "data", rename_all = "lowercase")]
pub enum SinkFrameBody {
    /// Lifecycle and membership notifications.
    Metadata(MetadataEvent),
    /// An application message routed to this sink.
    Message(MessageEvent),
}

/// Metadata events, discriminated by `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum MetadataEvent {
    /// First frame on every connection: the assigned peer id.
    Init { peer_id: String },
    /// Sent to a peer that just joined a channel.
    JoinChannel {
        channel_id: String,
        channel_name: String,
        channel_auth_mode: ChannelAuthMode,
        /// Stored messages replayable by id, ascending by creation time.
        channel_stored_messages: Vec<StoredMessageRef>,
        /// The other current members as of the subscription commit.
        members: Vec<MemberInfo>,
    },
    /// Sent to a peer that left a channel.
    LeaveChannel { channel_id: String },
    /// Sent to existing members when a new member joins.
    MemberJoin { channel_id: String, member: MemberInfo },
    /// Sent to remaining members when a member leaves or disconnects.
    MemberLeave { channel_id: String, member: MemberInfo },
}

/// Reference to a stored channel message (id + creation timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessageRef {
    pub id: String,
    pub date: DateTime<Utc>,
}

/// Channel member identity. `userInfo` is present only on presence channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_info: Option<JsonValue>,
}

/// An application message event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub event: String,
    pub from: MessageOrigin,
    pub message: MessagePayload,
}

/// Where a message frame came from, discriminated by `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum MessageOrigin {
    Broadcast,
    Direct,
    Channel {
        #[serde(rename = "channelId")]
        channel_id: String,
    },
}

// ============================================================================
// Sink → Server frames
// ============================================================================

/// Frames a sink connection may send. Anything else from a sink is ignored,
/// except the literal text `ping`, which is answered with `pong`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SinkRequest {
    /// Replay stored messages by id on a channel this sink is subscribed to.
    RequestStoredMessages {
        channel_id: String,
        #[serde(default)]
        message_ids: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_frame_shape() {
        let frame = SinkFrame {
            id: "f1".into(),
            body: SinkFrameBody::Metadata(MetadataEvent::Init {
                peer_id: "p1".into(),
            }),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "f1",
                "source": "metadata",
                "data": { "event": "init", "peerId": "p1" }
            })
        );
    }

    #[test]
    fn message_frame_shape() {
        let frame = SinkFrame {
            id: "m1".into(),
            body: SinkFrameBody::Message(MessageEvent {
                event: "x".into(),
                from: MessageOrigin::Broadcast,
                message: MessagePayload::Plain {
                    message: json!({"n": 1}),
                },
            }),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "m1",
                "source": "message",
                "data": {
                    "event": "x",
                    "from": { "source": "broadcast" },
                    "message": { "type": "plain", "message": { "n": 1 } }
                }
            })
        );
    }

    #[test]
    fn channel_origin_carries_channel_id() {
        let origin = MessageOrigin::Channel {
            channel_id: "c1".into(),
        };
        let value = serde_json::to_value(&origin).unwrap();
        assert_eq!(value, json!({ "source": "channel", "channelId": "c1" }));
    }

    #[test]
    fn member_info_omits_absent_user_info() {
        let member = MemberInfo {
            id: "u1".into(),
            user_info: None,
        };
        let value = serde_json::to_value(&member).unwrap();
        assert_eq!(value, json!({ "id": "u1" }));
    }

    #[test]
    fn chunk_payload_preserves_index() {
        let payload: MessagePayload =
            serde_json::from_value(json!({ "type": "chunk", "index": 3, "message": "abc" }))
                .unwrap();
        assert_eq!(
            payload,
            MessagePayload::Chunk {
                index: 3,
                message: json!("abc")
            }
        );
    }

    #[test]
    fn parses_stored_message_request() {
        let req: SinkRequest = serde_json::from_value(json!({
            "event": "request-stored-messages",
            "channelId": "c1",
            "messageIds": ["msg-1"]
        }))
        .unwrap();
        let SinkRequest::RequestStoredMessages {
            channel_id,
            message_ids,
        } = req;
        assert_eq!(channel_id, "c1");
        assert_eq!(message_ids, vec!["msg-1".to_string()]);
    }
}
