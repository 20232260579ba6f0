//! HTTP route handlers.

use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use callwire::config::NetworkConfig;
use callwire::InboundMessage;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Hand the body to the first protocol handler that accepts it.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let message = InboundMessage::new(content_type, body);

    let Some(handler) = state
        .handlers
        .iter()
        .find(|handler| handler.can_handle(&message))
    else {
        warn!(
            "No protocol handler accepts content type {:?}",
            message.content_type
        );
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("Expected {}", NetworkConfig::CONTENT_TYPE),
        )
            .into_response();
    };

    debug!("RPC payload of {} bytes", message.body.len());
    let reply = handler.process(message, state.executor.as_ref()).await;
    match reply.body {
        Some(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, NetworkConfig::CONTENT_TYPE)],
            body,
        )
            .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
