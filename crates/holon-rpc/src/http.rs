//! axum `Router` for the four HTTP surfaces (§4.F, §6.1).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::methods::dispatch_rpc;
use crate::stream::stream_handler;
use crate::AppState;

const GITHUB_CHANNEL_DEPTH: usize = 100;

pub fn router(state: Arc<AppState>) -> Router {
    let max_body_size = state.max_body_size;
    Router::new()
        .route("/ingress/github/webhook", post(github_webhook))
        .route("/rpc", post(rpc))
        .route("/rpc/stream", get(stream_handler))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "time": Utc::now()}))
}

/// Raw webhook ingress: merges `X-GitHub-Event`/`X-GitHub-Delivery` headers
/// into the body, then submits to the bounded ingest channel. Full ⇒ 503.
async fn github_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty body").into_response();
    }
    if body.len() > state.max_body_size {
        return (StatusCode::PAYLOAD_TOO_LARGE, "body too large").into_response();
    }

    let mut value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid json body").into_response(),
    };

    if let Value::Object(ref mut map) = value {
        if let Some(event) = headers.get("x-github-event").and_then(|v| v.to_str().ok()) {
            map.entry("event").or_insert_with(|| Value::String(event.to_string()));
        }
        if let Some(delivery) = headers.get("x-github-delivery").and_then(|v| v.to_str().ok()) {
            map.entry("x_github_delivery")
                .or_insert_with(|| Value::String(delivery.to_string()));
        }
    }

    match tokio::time::timeout(state.ingest_timeout, state.ingest_tx.send(value)).await {
        Ok(Ok(())) => StatusCode::ACCEPTED.into_response(),
        Ok(Err(_)) => (StatusCode::SERVICE_UNAVAILABLE, "ingest channel closed").into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "ingest channel full").into_response(),
    }
}

/// `POST /rpc` — a single JSON-RPC request/response round trip.
/// Notifications (absent `id`) produce `204 No Content`.
async fn rpc(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: crate::jsonrpc::JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            let err = crate::jsonrpc::JsonRpcError::new(
                crate::jsonrpc::PARSE_ERROR,
                format!("parse error: {e}"),
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(crate::jsonrpc::JsonRpcResponse::failure(Value::Null, err)),
            )
                .into_response();
        }
    };

    let is_notification = request.id.is_none();
    let id = request.id.clone().unwrap_or(Value::Null);
    let outcome = dispatch_rpc(&state, request).await;

    if is_notification {
        return StatusCode::NO_CONTENT.into_response();
    }

    match outcome {
        Ok(result) => Json(crate::jsonrpc::JsonRpcResponse::success(id, result)).into_response(),
        Err(err) => Json(crate::jsonrpc::JsonRpcResponse::failure(id, err)).into_response(),
    }
}

pub const fn ingest_channel_depth() -> usize {
    GITHUB_CHANNEL_DEPTH
}
