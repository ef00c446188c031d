//! The RPC + stream server (component F): a JSON-RPC 2.0 endpoint, an
//! NDJSON notification stream, and the turn state machine that backs both.

pub mod broadcaster;
pub mod dispatch;
mod http;
mod input;
mod jsonrpc;
mod methods;
mod stream;
pub mod turn;

pub use broadcaster::Broadcaster;
pub use dispatch::{ChannelDispatcher, TurnDispatcher};
pub use http::router;
pub use input::{validate_input, InputContentPart, InputMessage, ValidatedMessage};
pub use jsonrpc::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, Notification, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
pub use turn::{ActiveTurn, InterruptOutcome, Runtime};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Shared state behind the axum `Router`: the turn-state-machine runtime
/// and the bounded ingest channel the webhook handler submits raw JSON
/// onto (the supervisor owns the receiving end and feeds it through the
/// normalizer into the event service).
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub ingest_tx: tokio::sync::mpsc::Sender<serde_json::Value>,
    pub max_body_size: usize,
    pub ingest_timeout: Duration,
    /// Backing file for `holon/logStream` — `events.ndjson` in the state
    /// directory. `None` in tests that don't exercise log tailing.
    pub events_log_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(runtime: Arc<Runtime>, ingest_tx: tokio::sync::mpsc::Sender<serde_json::Value>) -> Self {
        Self {
            runtime,
            ingest_tx,
            max_body_size: 10 * 1024 * 1024,
            ingest_timeout: Duration::from_millis(2_000),
            events_log_path: None,
        }
    }

    pub fn with_events_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.events_log_path = Some(path.into());
        self
    }
}
