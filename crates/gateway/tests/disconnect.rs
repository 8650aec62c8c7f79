//! Disconnect reaping: a closed sink loses all its subscriptions and each
//! co-member hears exactly one member-leave per shared channel.

mod support;

use std::time::Duration;

use common::protocol::{ChannelAuthMode, MetadataEvent, SinkFrameBody};
use common::routes::{AddChannelSubscriberRequest, RouteRequest, SendDirectMessageRequest};
use common::RequestError;
use serde_json::json;
use support::{create_channel, expect_silence, next_frame, request};

#[tokio::test]
async fn disconnect_reaps_subscriptions_and_notifies_co_members() {
    let server = support::start().await;
    let (mut source, _) = server.connect_source().await;
    let c1 = create_channel(&mut source, "c1", ChannelAuthMode::Public, false).await;
    let c2 = create_channel(&mut source, "c2", ChannelAuthMode::Public, false).await;

    let (mut s1, p1) = server.connect_sink().await;
    let (mut s2, p2) = server.connect_sink().await;

    for (req, peer, channel) in [
        ("sub-1a", &p1, &c1),
        ("sub-1b", &p1, &c2),
        ("sub-2a", &p2, &c1),
    ] {
        let reply = request(
            &mut source,
            req,
            RouteRequest::AddChannelSubscriber(AddChannelSubscriberRequest {
                subscriber_id: peer.clone(),
                channel_id: channel.clone(),
            }),
        )
        .await;
        assert!(reply.response.success);
    }
    // Drain join/member-join noise.
    let _ = next_frame(&mut s1).await; // join c1
    let _ = next_frame(&mut s1).await; // join c2
    let _ = next_frame(&mut s1).await; // member-join (s2 on c1)
    let _ = next_frame(&mut s2).await; // join c1

    drop(s1); // hard close

    // s2 hears exactly one member-leave, for the shared channel only.
    let frame = next_frame(&mut s2).await;
    match frame.body {
        SinkFrameBody::Metadata(MetadataEvent::MemberLeave { channel_id, member }) => {
            assert_eq!(channel_id, c1);
            assert_eq!(member.id, p1);
        }
        other => panic!("expected member-leave, got {other:?}"),
    }
    expect_silence(&mut s2).await;

    // Both of s1's subscription rows are gone, and so is its peer row.
    for _ in 0..20 {
        if server
            .store
            .subscriptions_for_peer(&p1)
            .await
            .unwrap()
            .is_empty()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(server
        .store
        .subscriptions_for_peer(&p1)
        .await
        .unwrap()
        .is_empty());
    assert!(server.store.get_peer(&server.app.id, &p1).await.unwrap().is_none());
}

#[tokio::test]
async fn direct_send_to_disconnected_peer_reports_recipient_not_found() {
    let server = support::start().await;
    let (mut source, _) = server.connect_source().await;

    let (s1, p1) = server.connect_sink().await;
    drop(s1);

    // Wait for the reap so the durable row is gone.
    for _ in 0..20 {
        if server
            .store
            .get_peer(&server.app.id, &p1)
            .await
            .unwrap()
            .is_none()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let reply = request(
        &mut source,
        "d1",
        RouteRequest::SendDirectMessage(SendDirectMessageRequest {
            recipient_id: p1.clone(),
            event: "x".to_string(),
            message: common::protocol::MessagePayload::Plain {
                message: json!(1),
            },
        }),
    )
    .await;
    assert!(!reply.response.success);
    assert_eq!(reply.response.error, Some(RequestError::RecipientNotFound));
}

#[tokio::test]
async fn direct_send_reaches_live_recipient_by_peer_id() {
    let server = support::start().await;
    let (mut source, _) = server.connect_source().await;
    let (mut s1, p1) = server.connect_sink().await;
    let (mut s2, _) = server.connect_sink().await;

    let reply = request(
        &mut source,
        "d1",
        RouteRequest::SendDirectMessage(SendDirectMessageRequest {
            recipient_id: p1.clone(),
            event: "whisper".to_string(),
            message: common::protocol::MessagePayload::Plain {
                message: json!("hi"),
            },
        }),
    )
    .await;
    assert!(reply.response.success);

    let frame = support::next_frame_value(&mut s1).await;
    assert_eq!(frame["id"], "d1");
    assert_eq!(frame["data"]["from"], json!({ "source": "direct" }));

    // Nobody else hears a direct message.
    expect_silence(&mut s2).await;
}
