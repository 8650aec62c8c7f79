//! The internal control socket: bearer-matched upgrades, load snapshots, and
//! operator drains.

mod support;

use futures::{SinkExt, StreamExt};
use gateway::{GatewayConfig, DRAIN_CLOSE_CODE};
use serde_json::json;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest, http::HeaderValue, protocol::frame::coding::CloseCode, Message,
};

fn config_with_secret() -> GatewayConfig {
    GatewayConfig {
        coordination_secret: Some("coord-secret".to_string()),
        ..Default::default()
    }
}

async fn connect_control(server: &support::TestServer, token: &str) -> support::WsClient {
    let mut request = format!("ws://{}/internal", server.addr)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("control connect");
    ws
}

async fn control_request(ws: &mut support::WsClient, op: serde_json::Value) -> serde_json::Value {
    ws.send(Message::Text(op.to_string().into())).await.unwrap();
    let msg = tokio::time::timeout(support::READ_TIMEOUT, ws.next())
        .await
        .expect("timed out")
        .expect("closed")
        .expect("error");
    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("unexpected control reply: {other:?}"),
    }
}

#[tokio::test]
async fn control_upgrade_requires_the_secret() {
    let server = support::start_with_config(config_with_secret()).await;

    let bad = format!("ws://{}/internal", server.addr)
        .into_client_request()
        .unwrap();
    assert!(tokio_tungstenite::connect_async(bad).await.is_err());

    let mut ws = connect_control(&server, "coord-secret").await;
    let reply = control_request(&mut ws, json!({ "op": "shards" })).await;
    assert_eq!(reply["shards"], json!([]));
}

#[tokio::test]
async fn control_socket_is_disabled_without_a_secret() {
    let server = support::start().await;
    let request = format!("ws://{}/internal", server.addr)
        .into_client_request()
        .unwrap();
    assert!(tokio_tungstenite::connect_async(request).await.is_err());
}

#[tokio::test]
async fn snapshot_reflects_sink_dispatch() {
    let server = support::start_with_config(config_with_secret()).await;
    let (_s1, _) = server.connect_sink().await;
    let (_s2, _) = server.connect_sink().await;

    let mut ws = connect_control(&server, "coord-secret").await;
    let reply = control_request(&mut ws, json!({ "op": "shards" })).await;

    let shards = reply["shards"].as_array().unwrap();
    assert_eq!(shards.len(), 1, "two sinks fit on one shard under the cap");
    assert_eq!(shards[0]["connectionCount"], 2);
}

#[tokio::test]
async fn drain_closes_sinks_with_a_non_user_code() {
    let server = support::start_with_config(config_with_secret()).await;
    let (mut sink, _) = server.connect_sink().await;

    let mut ws = connect_control(&server, "coord-secret").await;
    let snapshot = control_request(&mut ws, json!({ "op": "shards" })).await;
    let shard_id = snapshot["shards"][0]["id"].as_u64().unwrap();

    let reply = control_request(&mut ws, json!({ "op": "drain", "shardId": shard_id })).await;
    assert_eq!(reply["drained"], 1);

    // The sink observes a close frame carrying the drain code, not 1000.
    let msg = tokio::time::timeout(support::READ_TIMEOUT, sink.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("socket error");
    match msg {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::from(DRAIN_CLOSE_CODE));
        }
        other => panic!("expected close frame, got {other:?}"),
    }

    let reply = control_request(&mut ws, json!({ "op": "drain", "shardId": 999 })).await;
    assert_eq!(reply["error"], "Unknown shard");
}
