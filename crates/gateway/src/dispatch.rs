//! Route dispatch: one validated envelope in, one correlated reply out.
//!
//! Both source transports (HTTP POST and the long-lived source WebSocket)
//! funnel through [`execute_route`], so they produce identical effects.

use metrics::counter;
use serde_json::Value as JsonValue;
use tracing::{error, warn};

use common::routes::{ReplyEnvelope, RouteRequest, RouteResponse, SourceEnvelope};
use common::RequestError;

use crate::channels::ChannelEngine;
use crate::error::GatewayError;

/// Execute one source request against an app and build its reply.
pub async fn execute_route(
    engine: &ChannelEngine,
    app_id: &str,
    envelope: SourceEnvelope,
) -> ReplyEnvelope {
    let route = envelope.data.route_name();
    counter!("sinkr_requests_total", "route" => route).increment(1);

    let result = run(engine, app_id, &envelope).await;
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            if e.is_internal() {
                error!(route, app_id, error = %e, "request failed");
            } else {
                warn!(route, app_id, error = %e, "request rejected");
            }
            counter!("sinkr_request_errors_total", "route" => route).increment(1);
            RouteResponse::err(e.to_wire())
        }
    };

    ReplyEnvelope::new(envelope.id, route, response)
}

async fn run(
    engine: &ChannelEngine,
    app_id: &str,
    envelope: &SourceEnvelope,
) -> Result<RouteResponse, GatewayError> {
    match &envelope.data {
        RouteRequest::AuthenticateUser(req) => {
            engine.authenticate_user(app_id, req).await?;
            Ok(RouteResponse::ok())
        }
        RouteRequest::CreateChannel(req) => {
            let channel_id = engine.create_channel(app_id, req).await?;
            Ok(RouteResponse::with_channel_id(channel_id))
        }
        RouteRequest::DeleteChannel(req) => {
            engine.delete_channel(app_id, req).await?;
            Ok(RouteResponse::ok())
        }
        RouteRequest::DeleteChannelMessages(req) => {
            engine.delete_channel_messages(app_id, req).await?;
            Ok(RouteResponse::ok())
        }
        RouteRequest::AddChannelSubscriber(req) => {
            engine.subscribe(app_id, req).await?;
            Ok(RouteResponse::ok())
        }
        RouteRequest::RemoveChannelSubscriber(req) => {
            engine.unsubscribe(app_id, req).await?;
            Ok(RouteResponse::ok())
        }
        RouteRequest::SendChannelMessage(req) => {
            engine
                .send_channel_message(app_id, &envelope.id, req)
                .await?;
            Ok(RouteResponse::ok())
        }
        RouteRequest::SendDirectMessage(req) => {
            engine
                .send_direct_message(app_id, &envelope.id, req)
                .await?;
            Ok(RouteResponse::ok())
        }
        RouteRequest::SendBroadcastMessage(req) => {
            engine
                .send_broadcast_message(app_id, &envelope.id, req)
                .await?;
            Ok(RouteResponse::ok())
        }
    }
}

/// Best-effort reply for an envelope that failed schema validation: echo
/// whatever id and route the raw JSON carried so the source can correlate.
pub fn invalid_request_reply(raw: &str) -> ReplyEnvelope {
    let value: JsonValue = serde_json::from_str(raw).unwrap_or(JsonValue::Null);
    let id = value
        .get("id")
        .and_then(JsonValue::as_str)
        .unwrap_or_default();
    let route = value
        .pointer("/data/route")
        .and_then(JsonValue::as_str)
        .unwrap_or_default();
    ReplyEnvelope::new(id, route, RouteResponse::err(RequestError::InvalidRequest))
}
