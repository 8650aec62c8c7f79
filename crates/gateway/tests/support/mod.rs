//! Shared harness for end-to-end tests: the real router served on an
//! ephemeral port, driven by real WebSocket clients.
#![allow(dead_code)] // each test binary uses a different subset

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use common::protocol::{MetadataEvent, SinkFrame, SinkFrameBody};
use common::routes::{ReplyEnvelope, RouteRequest, SourceEnvelope};
use gateway::{build_state, create_router, AppState, GatewayConfig};
use store::{App, Store};

pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Store,
    pub app: App,
    pub state: Arc<AppState>,
}

pub async fn start() -> TestServer {
    start_with_config(GatewayConfig::default()).await
}

pub async fn start_with_config(config: GatewayConfig) -> TestServer {
    let store = Store::open_in_memory().expect("open store");
    let app = store
        .create_app("test-app", "secret-key")
        .await
        .expect("create app");

    let state = build_state(store.clone(), config);
    let router = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    TestServer {
        addr,
        store,
        app,
        state,
    }
}

impl TestServer {
    /// Open a sink connection and read its `init` frame.
    pub async fn connect_sink(&self) -> (WsClient, String) {
        let url = format!("ws://{}/{}", self.addr, self.app.id);
        let (mut ws, _) = connect_async(url).await.expect("sink connect");
        let peer_id = read_init(&mut ws).await;
        (ws, peer_id)
    }

    /// Open an authenticated source connection and read its `init` frame.
    pub async fn connect_source(&self) -> (WsClient, String) {
        let url = format!(
            "ws://{}/{}?sinkrKey={}",
            self.addr, self.app.id, self.app.secret_key
        );
        let (mut ws, _) = connect_async(url).await.expect("source connect");
        let peer_id = read_init(&mut ws).await;
        (ws, peer_id)
    }

    pub fn http_url(&self) -> String {
        format!("http://{}/{}", self.addr, self.app.id)
    }
}

/// Read the next frame, panicking on timeout or close.
pub async fn next_frame(ws: &mut WsClient) -> SinkFrame {
    loop {
        let msg = timeout(READ_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        match msg {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("frame should parse")
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

/// Read the next frame as raw JSON for exact wire-shape assertions.
pub async fn next_frame_value(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = timeout(READ_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        match msg {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("frame should parse")
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

pub async fn read_init(ws: &mut WsClient) -> String {
    let frame = next_frame(ws).await;
    match frame.body {
        SinkFrameBody::Metadata(MetadataEvent::Init { peer_id }) => peer_id,
        other => panic!("expected init frame, got {other:?}"),
    }
}

/// Assert no frame arrives within a short window.
pub async fn expect_silence(ws: &mut WsClient) {
    let result = timeout(Duration::from_millis(300), ws.next()).await;
    if let Ok(Some(Ok(Message::Text(text)))) = &result {
        panic!("expected silence, got frame: {text}");
    }
}

/// Send one request envelope on a source socket and read the correlated
/// reply.
pub async fn request(source: &mut WsClient, id: &str, data: RouteRequest) -> ReplyEnvelope {
    let envelope = SourceEnvelope {
        id: id.to_string(),
        data,
    };
    source
        .send(Message::Text(
            serde_json::to_string(&envelope).unwrap().into(),
        ))
        .await
        .expect("send request");
    read_reply(source).await
}

/// Read one reply envelope from a source socket.
pub async fn read_reply(source: &mut WsClient) -> ReplyEnvelope {
    let msg = timeout(READ_TIMEOUT, source.next())
        .await
        .expect("timed out waiting for reply")
        .expect("socket closed")
        .expect("socket error");
    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()).expect("reply should parse"),
        other => panic!("unexpected message: {other:?}"),
    }
}

/// Create a channel through the source socket and return its id.
pub async fn create_channel(
    source: &mut WsClient,
    name: &str,
    auth_mode: common::protocol::ChannelAuthMode,
    store_messages: bool,
) -> String {
    let reply = request(
        source,
        "create-channel",
        RouteRequest::CreateChannel(common::routes::CreateChannelRequest {
            name: name.to_string(),
            auth_mode,
            store_messages,
        }),
    )
    .await;
    assert!(reply.response.success, "channel.create failed: {reply:?}");
    reply.response.channel_id.expect("channelId in reply")
}
