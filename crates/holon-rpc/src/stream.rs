//! `GET /rpc/stream` — the bidirectional NDJSON stream (§4.F.3).
//!
//! Outbound: one initial `thread/started` line, then every broadcaster
//! notification. Inbound: each complete line on the request body is
//! parsed as a JSON-RPC request and dispatched through the same method
//! registry as `/rpc`; notifications (no `id`) produce no reply line,
//! requests get their `JsonRpcResponse` written back onto the same
//! connection. A keep-alive `\n` is emitted periodically so proxies and
//! clients can detect a half-open socket.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse, Notification};
use crate::methods::dispatch_rpc;
use crate::AppState;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const WRITER_CHANNEL_DEPTH: usize = 256;

fn accepts_ndjson(headers: &HeaderMap) -> bool {
    match headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) {
        None => true,
        Some(accept) => accept.contains("application/x-ndjson") || accept.contains("*/*"),
    }
}

pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    if !accepts_ndjson(&headers) {
        return (
            StatusCode::NOT_ACCEPTABLE,
            "Accept: application/x-ndjson (or */*) required",
        )
            .into_response();
    }

    let (writer_tx, writer_rx) = mpsc::channel::<String>(WRITER_CHANNEL_DEPTH);

    let initial = Notification::new(
        "thread/started",
        serde_json::json!({ "session_id": state.runtime.controller_session_id() }),
    );
    if let Ok(mut line) = serde_json::to_string(&initial) {
        line.push('\n');
        let _ = writer_tx.try_send(line);
    }

    let mut sub = state.runtime.broadcaster.subscribe();
    let broadcaster = state.runtime.broadcaster.clone();
    let fanout_tx = writer_tx.clone();
    tokio::spawn(async move {
        let sub_id = sub.id;
        loop {
            tokio::select! {
                line = sub.rx.recv() => {
                    match line {
                        Some(line) => {
                            if fanout_tx.send(line).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = fanout_tx.closed() => break,
            }
        }
        broadcaster.unsubscribe(sub_id);
    });

    let keepalive_tx = writer_tx.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(KEEPALIVE_INTERVAL);
        loop {
            tick.tick().await;
            if keepalive_tx.send("\n".to_string()).await.is_err() {
                break;
            }
        }
    });

    let reader_state = state.clone();
    let reader_tx = writer_tx.clone();
    tokio::spawn(async move {
        let mut body_stream = request.into_body().into_data_stream();
        let mut buf: Vec<u8> = Vec::new();
        loop {
            match body_stream.next().await {
                Some(Ok(chunk)) => {
                    buf.extend_from_slice(&chunk);
                    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                        let line_bytes: Vec<u8> = buf.drain(..=pos).collect();
                        handle_inbound_line(&reader_state, &reader_tx, &line_bytes).await;
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "rpc/stream inbound read error");
                    break;
                }
                None => break,
            }
        }
    });

    let body = Body::from_stream(async_stream::stream! {
        let mut rx = writer_rx;
        while let Some(line) = rx.recv().await {
            yield Ok::<_, std::io::Error>(Bytes::from(line));
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .expect("building a streaming NDJSON response never fails")
}

async fn handle_inbound_line(state: &Arc<AppState>, reply_tx: &mpsc::Sender<String>, raw_line: &[u8]) {
    let line = String::from_utf8_lossy(raw_line);
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "malformed rpc/stream request line");
            return;
        }
    };
    let is_notification = request.id.is_none();
    let id = request.id.clone().unwrap_or(Value::Null);
    let outcome = dispatch_rpc(state, request).await;
    if is_notification {
        return;
    }
    let response = match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(err) => JsonRpcResponse::failure(id, err),
    };
    if let Ok(mut line) = serde_json::to_string(&response) {
        line.push('\n');
        let _ = reply_tx.send(line).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ndjson_or_wildcard_only() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, "application/x-ndjson".parse().unwrap());
        assert!(accepts_ndjson(&headers));

        headers.insert(header::ACCEPT, "*/*".parse().unwrap());
        assert!(accepts_ndjson(&headers));

        headers.insert(header::ACCEPT, "application/json".parse().unwrap());
        assert!(!accepts_ndjson(&headers));

        assert!(accepts_ndjson(&HeaderMap::new()));
    }
}
