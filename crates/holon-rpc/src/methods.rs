//! The JSON-RPC method table (§4.F.1): one async handler per method name,
//! dispatched by name from both `/rpc` and the inbound half of `/rpc/stream`.

use serde_json::{json, Value};

use crate::input::{validate_input, InputMessage};
use crate::jsonrpc::{JsonRpcError, JsonRpcRequest, METHOD_NOT_FOUND};
use crate::AppState;

pub async fn dispatch_rpc(
    state: &AppState,
    request: JsonRpcRequest,
) -> Result<Value, JsonRpcError> {
    match request.method.as_str() {
        "holon/status" => holon_status(state).await,
        "holon/pause" => holon_pause(state).await,
        "holon/resume" => holon_resume(state).await,
        "holon/logStream" => holon_log_stream(state, request.params).await,
        "thread/start" => thread_start(state, request.params).await,
        "turn/start" => turn_start(state, request.params).await,
        "turn/steer" => turn_steer(state, request.params).await,
        "turn/interrupt" => turn_interrupt(state, request.params).await,
        other => Err(JsonRpcError::new(
            METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        )),
    }
}

async fn holon_status(state: &AppState) -> Result<Value, JsonRpcError> {
    let status = state.runtime.status();
    Ok(serde_json::to_value(status).unwrap_or(Value::Null))
}

async fn holon_pause(state: &AppState) -> Result<Value, JsonRpcError> {
    match state.runtime.pause() {
        Ok(()) => Ok(json!({"success": true, "message": "paused"})),
        Err(reason) => Err(JsonRpcError::internal(reason)),
    }
}

async fn holon_resume(state: &AppState) -> Result<Value, JsonRpcError> {
    state.runtime.resume();
    Ok(json!({"success": true, "message": "resumed"}))
}

const MAX_LOG_LINES: usize = 10_000;
const DEFAULT_LOG_LINES: usize = 200;

#[derive(serde::Deserialize, Default)]
struct LogStreamParams {
    #[serde(default)]
    from_position: Option<u64>,
    #[serde(default)]
    max_lines: Option<usize>,
}

/// Reads a bounded slice of `events.ndjson` starting at `from_position`
/// (a byte offset; default 0), returning at most `max_lines` (capped at
/// 10000) whole lines plus the byte offset to resume from on the next
/// call. No backing file configured ⇒ an empty slice.
async fn holon_log_stream(state: &AppState, params: Value) -> Result<Value, JsonRpcError> {
    let parsed: LogStreamParams = if params.is_null() {
        LogStreamParams::default()
    } else {
        serde_json::from_value(params)
            .map_err(|e| JsonRpcError::invalid_params("params", &e.to_string()))?
    };
    let max_lines = parsed.max_lines.unwrap_or(DEFAULT_LOG_LINES).min(MAX_LOG_LINES);
    let from_position = parsed.from_position.unwrap_or(0);

    let Some(path) = &state.events_log_path else {
        return Ok(json!({"lines": [], "next_position": from_position}));
    };

    let (lines, next_position) = read_log_slice(path, from_position, max_lines)
        .await
        .map_err(|e| JsonRpcError::internal(e.to_string()))?;
    Ok(json!({"lines": lines, "next_position": next_position}))
}

async fn read_log_slice(
    path: &std::path::Path,
    from_position: u64,
    max_lines: usize,
) -> std::io::Result<(Vec<String>, u64)> {
    use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), from_position)),
        Err(e) => return Err(e),
    };
    let len = file.metadata().await?.len();
    let start = if from_position > len { 0 } else { from_position };
    file.seek(std::io::SeekFrom::Start(start)).await?;

    let mut reader = BufReader::new(file);
    let mut lines = Vec::new();
    let mut consumed: u64 = 0;
    while lines.len() < max_lines {
        let mut buf = String::new();
        let n = reader.read_line(&mut buf).await?;
        if n == 0 {
            break;
        }
        consumed += n as u64;
        if buf.ends_with('\n') {
            lines.push(buf.trim_end().to_string());
        } else {
            // Partial trailing line; don't advance past it.
            consumed -= n as u64;
            break;
        }
    }
    Ok((lines, start + consumed))
}

async fn thread_start(state: &AppState, params: Value) -> Result<Value, JsonRpcError> {
    let extended_context = params.get("extended_context").cloned();
    let (thread_id, session_id, started_at) = state.runtime.start_thread(extended_context);
    Ok(json!({
        "thread_id": thread_id,
        "session_id": session_id,
        "started_at": started_at,
    }))
}

#[derive(serde::Deserialize)]
struct TurnStartParams {
    thread_id: String,
    #[serde(default)]
    input: Vec<InputMessage>,
}

async fn turn_start(state: &AppState, params: Value) -> Result<Value, JsonRpcError> {
    let parsed: TurnStartParams = serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params("params", &e.to_string()))?;
    let validated = validate_input(&parsed.input)?;
    let turn = state
        .runtime
        .start_turn(parsed.thread_id, validated)
        .await?;
    Ok(json!({
        "turn_id": turn.id,
        "state": "active",
        "started_at": turn.started_at,
    }))
}

#[derive(serde::Deserialize)]
struct TurnSteerParams {
    turn_id: String,
    #[serde(default)]
    input: Vec<InputMessage>,
}

async fn turn_steer(state: &AppState, params: Value) -> Result<Value, JsonRpcError> {
    let parsed: TurnSteerParams = serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params("params", &e.to_string()))?;
    let validated = validate_input(&parsed.input)?;
    let (turn, accepted) = state
        .runtime
        .steer_turn(&parsed.turn_id, validated)
        .await?;
    Ok(json!({
        "turn_id": turn.id,
        "state": "active",
        "accepted_items": accepted,
        "accepted_at": chrono::Utc::now(),
    }))
}

#[derive(serde::Deserialize, Default)]
struct TurnInterruptParams {
    #[serde(default)]
    turn_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

async fn turn_interrupt(state: &AppState, params: Value) -> Result<Value, JsonRpcError> {
    let parsed: TurnInterruptParams = if params.is_null() {
        TurnInterruptParams::default()
    } else {
        serde_json::from_value(params)
            .map_err(|e| JsonRpcError::invalid_params("params", &e.to_string()))?
    };
    let outcome = state
        .runtime
        .interrupt(parsed.turn_id.as_deref(), parsed.reason.as_deref())?;
    Ok(json!({
        "turn_id": outcome.turn_id,
        "state": "interrupted",
        "interrupted_at": outcome.interrupted_at,
        "message": outcome.message,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ChannelDispatcher;
    use crate::turn::Runtime;
    use crate::Broadcaster;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_state(dir: &std::path::Path) -> AppState {
        let dispatcher = Arc::new(ChannelDispatcher::open(dir.join("channel.ndjson")).unwrap());
        let broadcaster = Arc::new(Broadcaster::new());
        let runtime = Runtime::new(
            dir.join("runtime-state.json"),
            Duration::from_secs(600),
            broadcaster,
            crate::dispatch::as_turn_dispatcher(dispatcher),
        );
        let (ingest_tx, _ingest_rx) = tokio::sync::mpsc::channel(10);
        AppState::new(runtime, ingest_tx)
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let req = JsonRpcRequest {
            jsonrpc: Some("2.0".into()),
            method: "nope/nope".into(),
            params: Value::Null,
            id: Some(json!(1)),
        };
        let err = dispatch_rpc(&state, req).await.unwrap_err();
        assert_eq!(err.code, crate::jsonrpc::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn status_then_pause_then_resume_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let status = holon_status(&state).await.unwrap();
        assert_eq!(status["state"], "running");
        holon_pause(&state).await.unwrap();
        assert!(holon_pause(&state).await.is_err());
        holon_resume(&state).await.unwrap();
    }

    #[tokio::test]
    async fn turn_start_requires_thread_id_and_valid_input() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (thread_id, _, _) = state.runtime.start_thread(None);
        let params = json!({
            "thread_id": thread_id,
            "input": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}],
        });
        let result = turn_start(&state, params).await.unwrap();
        assert!(result["turn_id"].as_str().unwrap().starts_with("turn-"));
    }

    #[tokio::test]
    async fn log_stream_returns_bounded_slice_and_resumable_position() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = test_state(dir.path());
        let log_path = dir.path().join("events.ndjson");
        std::fs::write(&log_path, "{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n").unwrap();
        state.events_log_path = Some(log_path);

        let first = holon_log_stream(&state, json!({"max_lines": 2})).await.unwrap();
        let lines = first["lines"].as_array().unwrap();
        assert_eq!(lines.len(), 2);
        let next_position = first["next_position"].as_u64().unwrap();

        let second = holon_log_stream(&state, json!({"from_position": next_position}))
            .await
            .unwrap();
        let lines2 = second["lines"].as_array().unwrap();
        assert_eq!(lines2.len(), 1);
        assert!(lines2[0].as_str().unwrap().contains("\"a\":3"));
    }

    #[tokio::test]
    async fn log_stream_without_backing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let result = holon_log_stream(&state, Value::Null).await.unwrap();
        assert_eq!(result["lines"].as_array().unwrap().len(), 0);
    }
}
