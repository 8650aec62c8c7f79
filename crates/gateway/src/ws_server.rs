//! Protocol front door using Axum.
//!
//! Routes:
//! - `GET /{app_id}` — WebSocket upgrade for sinks (no key) and sources
//!   (`?sinkrKey=` / `?appKey=` matching the app secret)
//! - `POST /{app_id}` — stateless source requests (`Authorization: Bearer`),
//!   one envelope per body or NDJSON with `X-Sinkr-Stream: true`
//! - `GET /internal` — coordinator control socket, bearer-matched against
//!   `COORDINATION_SECRET`
//! - `GET /health`

use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::protocol::SinkRequest;
use common::routes::SourceEnvelope;
use store::{App, Peer, PeerKind, Store};

use crate::channels::{init_frame, ChannelEngine};
use crate::coordinator::{Coordinator, DEFAULT_MAX_CONNECTIONS_PER_SHARD};
use crate::dispatch::{execute_route, invalid_request_reply};
use crate::registry::{PeerHandle, PeerRegistry};
use crate::shard::Shard;

/// Close code for sockets that were accepted but could not be opened.
pub const OPEN_FAILURE_CLOSE_CODE: u16 = 4000;

/// Runtime configuration, read from the environment by `main`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Soft cap on sink connections per shard (`MAX_CONNECTIONS_PER_OBJECT`).
    pub max_connections_per_shard: usize,
    /// Bearer token for `/internal` control upgrades; unset disables them.
    pub coordination_secret: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections_per_shard: DEFAULT_MAX_CONNECTIONS_PER_SHARD,
            coordination_secret: None,
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub store: Store,
    pub coordinator: Arc<Coordinator>,
    pub engine: ChannelEngine,
    pub config: GatewayConfig,
}

/// Wire the store and config into a ready state.
pub fn build_state(store: Store, config: GatewayConfig) -> Arc<AppState> {
    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        config.max_connections_per_shard,
    ));
    let engine = ChannelEngine::new(store.clone(), coordinator.clone());
    Arc::new(AppState {
        store,
        coordinator,
        engine,
        config,
    })
}

/// Create the public router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/internal", get(internal_handler))
        .route(
            "/{app_id}",
            get(upgrade_handler).post(source_request_handler),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Health
// ============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let peers = state.coordinator.total_connections().await;
    let shards = state.coordinator.shard_count().await;
    Json(json!({ "status": "ok", "peers": peers, "shards": shards }))
}

// ============================================================================
// WebSocket upgrade path
// ============================================================================

#[derive(Debug, Deserialize)]
struct SourceKeyQuery {
    #[serde(rename = "sinkrKey")]
    sinkr_key: Option<String>,
    #[serde(rename = "appKey")]
    app_key: Option<String>,
}

impl SourceKeyQuery {
    fn key(&self) -> Option<&str> {
        self.sinkr_key.as_deref().or(self.app_key.as_deref())
    }
}

/// `GET /{app_id}` with WebSocket headers.
async fn upgrade_handler(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Query(query): Query<SourceKeyQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let app = match state.store.get_app(&app_id).await {
        Ok(Some(app)) if app.enabled => app,
        Ok(_) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(app_id, error = %e, "app lookup failed during upgrade");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let kind = match query.key() {
        Some(key) if key == app.secret_key => PeerKind::Source,
        Some(_) => return StatusCode::UNAUTHORIZED.into_response(),
        None => PeerKind::Sink,
    };

    ws.on_upgrade(move |socket| handle_peer(state, app, kind, socket))
}

/// Own one peer connection from accept to reap.
async fn handle_peer(state: Arc<AppState>, app: App, kind: PeerKind, socket: WebSocket) {
    let peer_id = Uuid::new_v4().to_string();

    // Sinks are dispatched to the least-loaded shard; sources stay on the
    // coordinator.
    let shard: Option<Arc<Shard>> = match kind {
        PeerKind::Sink => match state.coordinator.assign_shard().await {
            Ok(shard) => Some(shard),
            Err(e) => {
                warn!(app_id = %app.id, error = %e, "shard assignment failed");
                close_unopened(socket, "Failed to open socket").await;
                return;
            }
        },
        PeerKind::Source => None,
    };
    let registry: &PeerRegistry = match &shard {
        Some(shard) => shard.registry(),
        None => state.coordinator.local(),
    };

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Writer task: drains the outbound queue into the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    // The durable row must exist before any membership event can involve
    // this peer.
    let row = Peer {
        id: peer_id.clone(),
        app_id: app.id.clone(),
        kind,
        authenticated_user_id: None,
        user_info: None,
    };
    if let Err(e) = state.store.insert_peer(&row).await {
        // A constraint failure means the app row vanished between the HTTP
        // check and now; anything else is a store fault.
        let reason = if e.is_constraint_violation() {
            "Invalid application"
        } else {
            "Failed to open socket"
        };
        warn!(app_id = %app.id, peer_id, error = %e, "peer registration failed");
        let _ = tx.send(Message::Close(Some(CloseFrame {
            code: OPEN_FAILURE_CLOSE_CODE,
            reason: reason.into(),
        })));
        drop(tx);
        let _ = send_task.await;
        return;
    }

    let handle = Arc::new(PeerHandle::new(peer_id.clone(), app.id.clone(), tx));
    registry.register(handle.clone());
    if let Some(shard) = &shard {
        state.coordinator.report_load(shard).await;
    }

    counter!("sinkr_connections_total", "kind" => kind.as_str()).increment(1);
    gauge!("sinkr_active_connections").increment(1.0);
    info!(app_id = %app.id, peer_id, kind = kind.as_str(), "peer connected");

    match init_frame(&peer_id) {
        Ok(frame) => {
            handle.send_text(&frame);
        }
        Err(e) => warn!(peer_id, error = %e, "failed to build init frame"),
    }

    match kind {
        PeerKind::Sink => run_sink_loop(&state, &app, &peer_id, &handle, &mut ws_rx).await,
        PeerKind::Source => run_source_loop(&state, &app, &handle, &mut ws_rx).await,
    }

    // Cleanup: drop the live handle, mirror the load, reap membership.
    registry.unregister(&peer_id);
    if let Some(shard) = &shard {
        state.coordinator.report_load(shard).await;
    }
    if let Err(e) = state.engine.handle_disconnect(&app.id, &peer_id).await {
        warn!(app_id = %app.id, peer_id, error = %e, "disconnect reaping failed");
    }
    send_task.abort();

    counter!("sinkr_disconnections_total", "kind" => kind.as_str()).increment(1);
    gauge!("sinkr_active_connections").decrement(1.0);
    info!(app_id = %app.id, peer_id, "peer disconnected");
}

/// Close a socket that never finished opening.
async fn close_unopened(mut socket: WebSocket, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: OPEN_FAILURE_CLOSE_CODE,
            reason: reason.into(),
        })))
        .await;
}

/// Sink connections may only request stored-message replay and keepalive;
/// every other frame is ignored.
async fn run_sink_loop(
    state: &Arc<AppState>,
    app: &App,
    peer_id: &str,
    handle: &Arc<PeerHandle>,
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
) {
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let text = text.as_str();
                if text == "ping" {
                    handle.send_raw(Message::Text("pong".into()));
                    continue;
                }
                match serde_json::from_str::<SinkRequest>(text) {
                    Ok(SinkRequest::RequestStoredMessages {
                        channel_id,
                        message_ids,
                    }) => {
                        if let Err(e) = state
                            .engine
                            .replay_stored_messages(&app.id, peer_id, &channel_id, &message_ids)
                            .await
                        {
                            warn!(peer_id, error = %e, "stored message replay failed");
                        }
                    }
                    Err(_) => {
                        debug!(peer_id, "ignoring unexpected sink frame");
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                handle.send_raw(Message::Pong(data));
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
}

/// Source connections stream request envelopes; replies are correlated by id
/// and may be written out of order.
async fn run_source_loop(
    state: &Arc<AppState>,
    app: &App,
    handle: &Arc<PeerHandle>,
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
) {
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let reply = match serde_json::from_str::<SourceEnvelope>(text.as_str()) {
                    Ok(envelope) => execute_route(&state.engine, &app.id, envelope).await,
                    Err(_) => invalid_request_reply(text.as_str()),
                };
                match serde_json::to_string(&reply) {
                    Ok(json) => {
                        handle.send_text(&json);
                    }
                    Err(e) => warn!(error = %e, "failed to serialize reply"),
                }
            }
            Ok(Message::Ping(data)) => {
                handle.send_raw(Message::Pong(data));
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
}

// ============================================================================
// HTTP source request path
// ============================================================================

/// `POST /{app_id}` with `Authorization: Bearer <secretKey>`.
async fn source_request_handler(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let app = match state.store.get_app(&app_id).await {
        Ok(Some(app)) if app.enabled => app,
        Ok(_) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(app_id, error = %e, "app lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match bearer_token(&headers) {
        Some(token) if token == app.secret_key => {}
        _ => return StatusCode::UNAUTHORIZED.into_response(),
    }

    let streamed = headers
        .get("x-sinkr-stream")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    if streamed {
        // NDJSON: one envelope per line, one reply per line, in order. A
        // malformed line yields an Invalid request reply and the stream
        // continues.
        let mut replies = Vec::new();
        for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let reply = match serde_json::from_str::<SourceEnvelope>(line) {
                Ok(envelope) => execute_route(&state.engine, &app.id, envelope).await,
                Err(_) => invalid_request_reply(line),
            };
            match serde_json::to_string(&reply) {
                Ok(json) => replies.push(json),
                Err(e) => warn!(error = %e, "failed to serialize streamed reply"),
            }
        }
        let mut out = replies.join("\n");
        out.push('\n');
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/x-ndjson")],
            out,
        )
            .into_response();
    }

    match serde_json::from_str::<SourceEnvelope>(&body) {
        Ok(envelope) => {
            let reply = execute_route(&state.engine, &app.id, envelope).await;
            (StatusCode::OK, Json(reply)).into_response()
        }
        Err(_) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "Invalid request" })),
        )
            .into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

// ============================================================================
// Internal control socket
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum ControlRequest {
    /// Load-table snapshot.
    Shards,
    /// Close every sink on one shard.
    Drain {
        #[serde(rename = "shardId")]
        shard_id: u64,
    },
}

/// `GET /internal`: bearer-matched against `COORDINATION_SECRET`. Handled on
/// the coordinator itself; never dispatched to a shard.
async fn internal_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(secret) = state.config.coordination_secret.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match bearer_token(&headers) {
        Some(token) if token == secret => {}
        _ => return StatusCode::UNAUTHORIZED.into_response(),
    }

    ws.on_upgrade(move |socket| handle_control(state, socket))
}

async fn handle_control(state: Arc<AppState>, mut socket: WebSocket) {
    info!("control connection opened");
    while let Some(msg) = socket.next().await {
        let reply = match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ControlRequest>(text.as_str())
            {
                Ok(ControlRequest::Shards) => match state.coordinator.shard_snapshot().await {
                    Ok(shards) => json!({ "shards": shards }),
                    Err(e) => {
                        warn!(error = %e, "load snapshot failed");
                        json!({ "success": false, "error": "Unknown error" })
                    }
                },
                Ok(ControlRequest::Drain { shard_id }) => {
                    match state.coordinator.drain_shard(shard_id).await {
                        Some(closed) => json!({ "drained": closed }),
                        None => json!({ "success": false, "error": "Unknown shard" }),
                    }
                }
                Err(_) => json!({ "success": false, "error": "Invalid request" }),
            },
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };
        if socket
            .send(Message::Text(reply.to_string().into()))
            .await
            .is_err()
        {
            break;
        }
    }
    info!("control connection closed");
}
