//! Source request envelopes and the typed route union.
//!
//! A source — over its long-lived WebSocket or a single HTTP POST — always
//! sends the same envelope:
//!
//! ```json
//! { "id": "<uuid>", "data": { "route": "<name>", "request": { ... } } }
//! ```
//!
//! and receives a reply correlated by `id`:
//!
//! ```json
//! { "id": "<echoed>", "route": "<name>", "response": { "success": true } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::RequestError;
use crate::protocol::{ChannelAuthMode, MessagePayload};

// ============================================================================
// Envelopes
// ============================================================================

/// Source → server request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEnvelope {
    /// Correlation id, echoed in the reply. Also the stored-message id for
    /// `channel.messages.send` on stored channels.
    pub id: String,
    pub data: RouteRequest,
}

/// Server → source reply envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub id: String,
    pub route: String,
    pub response: RouteResponse,
}

impl ReplyEnvelope {
    pub fn new(id: impl Into<String>, route: impl Into<String>, response: RouteResponse) -> Self {
        Self {
            id: id.into(),
            route: route.into(),
            response,
        }
    }
}

// ============================================================================
// Route union
// ============================================================================

/// The typed route union: `{"route": <name>, "request": <body>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "route", content = "request")]
pub enum RouteRequest {
    /// Attach an authenticated user identity to a peer.
    #[serde(rename = "user.authenticate")]
    AuthenticateUser(AuthenticateUserRequest),

    /// Upsert a channel by `(app, name)`; returns its id.
    #[serde(rename = "channel.create")]
    CreateChannel(CreateChannelRequest),

    /// Delete a channel, cascading subscriptions and stored messages.
    #[serde(rename = "channel.delete")]
    DeleteChannel(DeleteChannelRequest),

    /// Bulk-delete stored messages of a channel.
    #[serde(rename = "channel.messages.delete")]
    DeleteChannelMessages(DeleteChannelMessagesRequest),

    /// Subscribe a peer to a channel, with join notifications.
    #[serde(rename = "channel.subscribers.add")]
    AddChannelSubscriber(AddChannelSubscriberRequest),

    /// Unsubscribe a peer from a channel, with leave notifications.
    #[serde(rename = "channel.subscribers.remove")]
    RemoveChannelSubscriber(RemoveChannelSubscriberRequest),

    /// Publish a message to all subscribers of a channel.
    #[serde(rename = "channel.messages.send")]
    SendChannelMessage(SendChannelMessageRequest),

    /// Deliver a message directly to one identified peer or user.
    #[serde(rename = "user.messages.send")]
    SendDirectMessage(SendDirectMessageRequest),

    /// Deliver a message to every peer of the app.
    #[serde(rename = "global.messages.send")]
    SendBroadcastMessage(SendBroadcastMessageRequest),
}

impl RouteRequest {
    /// The wire name of this route, echoed in replies.
    pub fn route_name(&self) -> &'static str {
        match self {
            RouteRequest::AuthenticateUser(_) => "user.authenticate",
            RouteRequest::CreateChannel(_) => "channel.create",
            RouteRequest::DeleteChannel(_) => "channel.delete",
            RouteRequest::DeleteChannelMessages(_) => "channel.messages.delete",
            RouteRequest::AddChannelSubscriber(_) => "channel.subscribers.add",
            RouteRequest::RemoveChannelSubscriber(_) => "channel.subscribers.remove",
            RouteRequest::SendChannelMessage(_) => "channel.messages.send",
            RouteRequest::SendDirectMessage(_) => "user.messages.send",
            RouteRequest::SendBroadcastMessage(_) => "global.messages.send",
        }
    }
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateUserRequest {
    /// The peer to authenticate.
    pub peer_id: String,
    /// The user identity to attach.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_info: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelRequest {
    pub name: String,
    pub auth_mode: ChannelAuthMode,
    #[serde(default)]
    pub store_messages: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteChannelRequest {
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteChannelMessagesRequest {
    pub channel_id: String,
    /// When empty or absent, every stored message of the channel is deleted.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChannelSubscriberRequest {
    /// Matched against `peer.id` first, then `authenticatedUserId`.
    pub subscriber_id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveChannelSubscriberRequest {
    pub subscriber_id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChannelMessageRequest {
    pub channel_id: String,
    pub event: String,
    pub message: MessagePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendDirectMessageRequest {
    /// Matched against `peer.id` first, then `authenticatedUserId`.
    pub recipient_id: String,
    pub event: String,
    pub message: MessagePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBroadcastMessageRequest {
    pub event: String,
    pub message: MessagePayload,
}

// ============================================================================
// Responses
// ============================================================================

/// Route reply payload: `{"success": true, ...}` or
/// `{"success": false, "error": "<string>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<RequestError>,
    /// Present on successful `channel.create` replies.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub channel_id: Option<String>,
}

impl RouteResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            channel_id: None,
        }
    }

    pub fn with_channel_id(channel_id: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            channel_id: Some(channel_id.into()),
        }
    }

    pub fn err(error: RequestError) -> Self {
        Self {
            success: false,
            error: Some(error),
            channel_id: None,
        }
    }
}
