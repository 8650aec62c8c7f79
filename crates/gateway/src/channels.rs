//! Channel engine: authorization, membership transitions, presence
//! notifications, and the stored-message policy.
//!
//! The engine itself is stateless; durable state lives in the store and live
//! handles in the per-shard registries. Every membership mutation is a single
//! store transaction followed by best-effort notification fan-out — a dead
//! peer never fails a committed mutation, its disconnect handler converges
//! the state instead.

use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use common::protocol::{
    ChannelAuthMode, MemberInfo, MessageEvent, MessageOrigin, MessagePayload, MetadataEvent,
    SinkFrame, SinkFrameBody,
};
use common::routes::{
    AddChannelSubscriberRequest, AuthenticateUserRequest, CreateChannelRequest,
    DeleteChannelMessagesRequest, DeleteChannelRequest, RemoveChannelSubscriberRequest,
    SendBroadcastMessageRequest, SendChannelMessageRequest, SendDirectMessageRequest,
};
use common::RequestError;
use store::{Channel, Peer, Store, SubscribeOutcome};

use crate::coordinator::Coordinator;
use crate::error::Result;

/// What a stored channel message persists: enough to rebuild the frame.
#[derive(Debug, Serialize, Deserialize)]
struct StoredPayload {
    event: String,
    message: MessagePayload,
}

/// Stateless executor for channel and messaging operations.
#[derive(Clone)]
pub struct ChannelEngine {
    store: Store,
    coordinator: Arc<Coordinator>,
}

impl ChannelEngine {
    pub fn new(store: Store, coordinator: Arc<Coordinator>) -> Self {
        Self { store, coordinator }
    }

    // ------------------------------------------------------------------
    // Peer identity
    // ------------------------------------------------------------------

    pub async fn authenticate_user(
        &self,
        app_id: &str,
        req: &AuthenticateUserRequest,
    ) -> Result<()> {
        let found = self
            .store
            .authenticate_peer(app_id, &req.peer_id, &req.id, req.user_info.as_ref())
            .await?;
        if !found {
            return Err(RequestError::PeerNotFound.into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Channel CRUD
    // ------------------------------------------------------------------

    /// Upsert by `(app, name)`; returns the channel id either way.
    pub async fn create_channel(
        &self,
        app_id: &str,
        req: &CreateChannelRequest,
    ) -> Result<String> {
        let channel = self
            .store
            .upsert_channel(app_id, &req.name, req.auth_mode, req.store_messages)
            .await?;
        Ok(channel.id)
    }

    pub async fn delete_channel(&self, app_id: &str, req: &DeleteChannelRequest) -> Result<()> {
        if !self.store.delete_channel(app_id, &req.channel_id).await? {
            return Err(RequestError::ChannelNotFound.into());
        }
        Ok(())
    }

    pub async fn delete_channel_messages(
        &self,
        app_id: &str,
        req: &DeleteChannelMessagesRequest,
    ) -> Result<()> {
        let channel = self.require_channel(app_id, &req.channel_id).await?;
        self.store
            .delete_stored_messages(&channel.id, req.message_ids.as_deref())
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Subscribe a peer to a channel and notify. A duplicate subscribe is a
    /// success that emits nothing.
    pub async fn subscribe(
        &self,
        app_id: &str,
        req: &AddChannelSubscriberRequest,
    ) -> Result<()> {
        let channel = self.require_channel(app_id, &req.channel_id).await?;
        let peer = self
            .store
            .resolve_peer(app_id, &req.subscriber_id)
            .await?
            .ok_or(RequestError::PeerNotFound)?;

        if channel.auth_mode.requires_authentication() && peer.authenticated_user_id.is_none() {
            return Err(RequestError::PeerNotAuthenticated.into());
        }

        let other_members = match self.store.subscribe(app_id, &peer.id, &channel.id).await? {
            SubscribeOutcome::Duplicate => return Ok(()),
            SubscribeOutcome::Inserted { other_members } => other_members,
        };
        counter!("sinkr_subscriptions_total").increment(1);

        let stored = if channel.store_messages {
            self.store.stored_message_refs(&channel.id).await?
        } else {
            Vec::new()
        };

        let join = metadata_frame(MetadataEvent::JoinChannel {
            channel_id: channel.id.clone(),
            channel_name: channel.name.clone(),
            channel_auth_mode: channel.auth_mode,
            channel_stored_messages: stored,
            members: other_members
                .iter()
                .map(|m| member_info(m, channel.auth_mode))
                .collect(),
        })?;
        self.coordinator
            .deliver_to_peers(std::slice::from_ref(&peer.id), &join)
            .await;

        if !other_members.is_empty() {
            let member_join = metadata_frame(MetadataEvent::MemberJoin {
                channel_id: channel.id.clone(),
                member: member_info(&peer, channel.auth_mode),
            })?;
            let member_ids: Vec<String> = other_members.iter().map(|m| m.id.clone()).collect();
            self.coordinator
                .deliver_to_peers(&member_ids, &member_join)
                .await;
        }

        Ok(())
    }

    /// Unsubscribe a peer, notifying it and the remaining members.
    pub async fn unsubscribe(
        &self,
        app_id: &str,
        req: &RemoveChannelSubscriberRequest,
    ) -> Result<()> {
        let channel = self.require_channel(app_id, &req.channel_id).await?;
        let peer = self
            .store
            .resolve_peer(app_id, &req.subscriber_id)
            .await?
            .ok_or(RequestError::PeerNotFound)?;

        if !self.store.unsubscribe(app_id, &peer.id, &channel.id).await? {
            return Err(RequestError::PeerNotSubscribed.into());
        }

        let leave = metadata_frame(MetadataEvent::LeaveChannel {
            channel_id: channel.id.clone(),
        })?;
        self.coordinator
            .deliver_to_peers(std::slice::from_ref(&peer.id), &leave)
            .await;

        self.notify_member_left(&channel, &peer).await?;
        Ok(())
    }

    /// Socket-close reaping: remove the peer row (cascading its
    /// subscriptions) and emit exactly one `member-leave` per co-subscriber
    /// per shared channel.
    pub async fn handle_disconnect(&self, app_id: &str, peer_id: &str) -> Result<()> {
        let Some(peer) = self.store.get_peer(app_id, peer_id).await? else {
            // Registration failed earlier; nothing durable to reap.
            return Ok(());
        };
        let subscriptions = self.store.subscriptions_for_peer(peer_id).await?;
        self.store.delete_peer(peer_id).await?;

        for subscription in subscriptions {
            // The channel may have been deleted concurrently; skip quietly.
            let Some(channel) = self
                .store
                .get_channel(app_id, &subscription.channel_id)
                .await?
            else {
                continue;
            };
            self.notify_member_left(&channel, &peer).await?;
        }
        Ok(())
    }

    async fn notify_member_left(&self, channel: &Channel, peer: &Peer) -> Result<()> {
        let remaining = self.store.channel_members(&channel.id).await?;
        if remaining.is_empty() {
            return Ok(());
        }
        let member_leave = metadata_frame(MetadataEvent::MemberLeave {
            channel_id: channel.id.clone(),
            member: member_info(peer, channel.auth_mode),
        })?;
        let ids: Vec<String> = remaining.iter().map(|m| m.id.clone()).collect();
        self.coordinator
            .deliver_to_peers(&ids, &member_leave)
            .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Message delivery
    // ------------------------------------------------------------------

    /// Publish to a channel: persist when the channel stores messages, then
    /// push to the subscriber set as observed once at send time.
    pub async fn send_channel_message(
        &self,
        app_id: &str,
        envelope_id: &str,
        req: &SendChannelMessageRequest,
    ) -> Result<()> {
        let channel = self.require_channel(app_id, &req.channel_id).await?;

        if channel.store_messages {
            let payload = serde_json::to_value(StoredPayload {
                event: req.event.clone(),
                message: req.message.clone(),
            })?;
            self.store
                .store_message(envelope_id, app_id, &channel.id, &payload)
                .await?;
        }

        let members = self.store.channel_members(&channel.id).await?;
        if members.is_empty() {
            return Ok(());
        }

        let frame = message_frame(
            envelope_id,
            &req.event,
            MessageOrigin::Channel {
                channel_id: channel.id.clone(),
            },
            req.message.clone(),
        )?;
        let ids: Vec<String> = members.iter().map(|m| m.id.clone()).collect();
        let outcome = self.coordinator.deliver_to_peers(&ids, &frame).await;
        counter!("sinkr_messages_routed_total", "mode" => "channel")
            .increment(outcome.delivered as u64);
        Ok(())
    }

    /// Direct delivery. The recipient id matches a peer id or an
    /// authenticated user id; delivery to any one shard is enough.
    pub async fn send_direct_message(
        &self,
        app_id: &str,
        envelope_id: &str,
        req: &SendDirectMessageRequest,
    ) -> Result<()> {
        let recipients = self
            .store
            .resolve_recipients(app_id, &req.recipient_id)
            .await?;
        if recipients.is_empty() {
            return Err(RequestError::RecipientNotFound.into());
        }

        let frame = message_frame(
            envelope_id,
            &req.event,
            MessageOrigin::Direct,
            req.message.clone(),
        )?;
        let ids: Vec<String> = recipients.iter().map(|p| p.id.clone()).collect();
        let outcome = self.coordinator.deliver_to_peers(&ids, &frame).await;
        if !outcome.any() {
            // Rows existed but every socket was already dead.
            return Err(RequestError::RecipientNotFound.into());
        }
        counter!("sinkr_messages_routed_total", "mode" => "direct")
            .increment(outcome.delivered as u64);
        Ok(())
    }

    /// Broadcast to every peer of the app, on every shard.
    pub async fn send_broadcast_message(
        &self,
        app_id: &str,
        envelope_id: &str,
        req: &SendBroadcastMessageRequest,
    ) -> Result<()> {
        let frame = message_frame(
            envelope_id,
            &req.event,
            MessageOrigin::Broadcast,
            req.message.clone(),
        )?;
        let outcome = self.coordinator.deliver_app(app_id, &frame).await;
        counter!("sinkr_messages_routed_total", "mode" => "broadcast")
            .increment(outcome.delivered as u64);
        Ok(())
    }

    /// Replay stored messages to one sink, ascending by creation time. Sent
    /// only when the sink is actually subscribed; otherwise the request is
    /// ignored like any other unexpected sink frame.
    pub async fn replay_stored_messages(
        &self,
        app_id: &str,
        peer_id: &str,
        channel_id: &str,
        message_ids: &[String],
    ) -> Result<()> {
        if !self.store.is_subscribed(app_id, peer_id, channel_id).await? {
            debug!(peer_id, channel_id, "replay request from non-member ignored");
            return Ok(());
        }

        let messages = self
            .store
            .stored_messages_by_ids(channel_id, message_ids)
            .await?;
        let target = [peer_id.to_string()];
        for stored in messages {
            let payload: StoredPayload = match serde_json::from_value(stored.data) {
                Ok(p) => p,
                Err(e) => {
                    warn!(message_id = %stored.id, error = %e, "undecodable stored message");
                    continue;
                }
            };
            let frame = message_frame(
                &stored.id,
                &payload.event,
                MessageOrigin::Channel {
                    channel_id: channel_id.to_string(),
                },
                payload.message,
            )?;
            self.coordinator.deliver_to_peers(&target, &frame).await;
        }
        Ok(())
    }

    async fn require_channel(&self, app_id: &str, channel_id: &str) -> Result<Channel> {
        self.store
            .get_channel(app_id, channel_id)
            .await?
            .ok_or_else(|| RequestError::ChannelNotFound.into())
    }
}

/// Member identity as shown on the wire: the authenticated user id when set,
/// with `userInfo` only on presence channels.
fn member_info(peer: &Peer, auth_mode: ChannelAuthMode) -> MemberInfo {
    MemberInfo {
        id: peer.member_id().to_string(),
        user_info: if auth_mode.exposes_user_info() {
            peer.user_info.clone()
        } else {
            None
        },
    }
}

fn metadata_frame(event: MetadataEvent) -> Result<String> {
    let frame = SinkFrame {
        id: Uuid::new_v4().to_string(),
        body: SinkFrameBody::Metadata(event),
    };
    Ok(serde_json::to_string(&frame)?)
}

fn message_frame(
    id: &str,
    event: &str,
    from: MessageOrigin,
    message: MessagePayload,
) -> Result<String> {
    let frame = SinkFrame {
        id: id.to_string(),
        body: SinkFrameBody::Message(MessageEvent {
            event: event.to_string(),
            from,
            message,
        }),
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Extracted for reuse by the init path in `ws_server`.
pub(crate) fn init_frame(peer_id: &str) -> Result<String> {
    metadata_frame(MetadataEvent::Init {
        peer_id: peer_id.to_string(),
    })
}
