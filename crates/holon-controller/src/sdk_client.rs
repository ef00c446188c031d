//! A subprocess-backed [`AgentClient`]: spawns the vendor agent SDK's CLI
//! entrypoint once and speaks newline-delimited JSON over its stdin/stdout,
//! the same shape `mcp-client`'s `StdioTransport` uses for MCP servers.
//! `create_session`/`resume_session` send one request and read one reply;
//! `send_and_stream` keeps reading lines into the returned channel until a
//! `{"type":"final"}` or `{"type":"error"}` frame closes the turn.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Mutex};

use crate::client::{AgentClient, ClientError, TurnStreamEvent};

/// How to launch the vendor SDK process. Read from the environment rather
/// than `ControllerConfig` (§6.4's documented tunables are all about the
/// event pipeline, not the SDK binary) since a real deployment pins this
/// in its process supervisor, not the agent config file.
#[derive(Debug, Clone)]
pub struct SdkClientConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl SdkClientConfig {
    /// `AGENT_SDK_COMMAND` (default `"agent-sdk"`) plus whitespace-split
    /// `AGENT_SDK_ARGS`.
    pub fn from_env() -> Self {
        let command = std::env::var("AGENT_SDK_COMMAND").unwrap_or_else(|_| "agent-sdk".to_string());
        let args = std::env::var("AGENT_SDK_ARGS")
            .ok()
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        Self { command, args }
    }
}

#[derive(Serialize)]
struct SdkRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct SdkReply {
    #[allow(dead_code)]
    id: u64,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SdkStreamFrame {
    Delta { text: String },
    Final { text: String },
    Error { message: String },
}

pub struct ProcessAgentClient {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    #[allow(dead_code)]
    child: Mutex<Child>,
    request_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl ProcessAgentClient {
    pub fn spawn(config: &SdkClientConfig) -> Result<Self, ClientError> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit());

        let mut child = cmd
            .spawn()
            .map_err(|e| ClientError::Session(format!("failed to spawn agent SDK process: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Session("failed to capture agent SDK stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Session("failed to capture agent SDK stdout".into()))?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            request_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
        })
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn write_request(&self, method: &str, params: Value) -> Result<u64, ClientError> {
        let id = self.next_request_id();
        let req = SdkRequest { id, method, params };
        let mut line = serde_json::to_vec(&req)
            .map_err(|e| ClientError::Send(format!("encoding request: {e}")))?;
        line.push(b'\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(&line)
            .await
            .map_err(|e| ClientError::Send(e.to_string()))?;
        stdin.flush().await.map_err(|e| ClientError::Send(e.to_string()))?;
        Ok(id)
    }

    async fn read_reply(&self) -> Result<SdkReply, ClientError> {
        let mut stdout = self.stdout.lock().await;
        let mut line = String::new();
        let n = stdout
            .read_line(&mut line)
            .await
            .map_err(|e| ClientError::Session(e.to_string()))?;
        if n == 0 {
            return Err(ClientError::Session("agent SDK process closed stdout".into()));
        }
        serde_json::from_str(line.trim()).map_err(|e| ClientError::Session(format!("malformed reply: {e}")))
    }

    async fn call(&self, method: &str, params: Value) -> Result<String, ClientError> {
        let _guard = self.request_lock.lock().await;
        self.write_request(method, params).await?;
        let reply = self.read_reply().await?;
        if let Some(err) = reply.error {
            return Err(ClientError::Session(err));
        }
        reply
            .session_id
            .ok_or_else(|| ClientError::Session("reply missing session_id".into()))
    }
}

#[async_trait]
impl AgentClient for ProcessAgentClient {
    async fn create_session(&self) -> Result<String, ClientError> {
        self.call("session.create", serde_json::json!({})).await
    }

    async fn resume_session(&self, session_id: &str) -> Result<String, ClientError> {
        self.call("session.resume", serde_json::json!({ "session_id": session_id }))
            .await
    }

    async fn send_and_stream(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<mpsc::Receiver<TurnStreamEvent>, ClientError> {
        let _guard = self.request_lock.lock().await;
        self.write_request(
            "turn.send",
            serde_json::json!({ "session_id": session_id, "text": text }),
        )
        .await?;

        let (tx, rx) = mpsc::channel(32);
        loop {
            let reply = {
                let mut stdout = self.stdout.lock().await;
                let mut line = String::new();
                let n = stdout
                    .read_line(&mut line)
                    .await
                    .map_err(|e| ClientError::Send(e.to_string()))?;
                if n == 0 {
                    let _ = tx.send(TurnStreamEvent::Error("agent SDK process closed stdout mid-turn".into())).await;
                    break;
                }
                line
            };
            let frame: SdkStreamFrame = match serde_json::from_str(reply.trim()) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(error = %e, line = %reply.trim(), "skipping malformed stream frame");
                    continue;
                }
            };
            let done = matches!(frame, SdkStreamFrame::Final { .. } | SdkStreamFrame::Error { .. });
            let event = match frame {
                SdkStreamFrame::Delta { text } => TurnStreamEvent::Delta(text),
                SdkStreamFrame::Final { text } => TurnStreamEvent::Final(text),
                SdkStreamFrame::Error { message } => TurnStreamEvent::Error(message),
            };
            if tx.send(event).await.is_err() || done {
                break;
            }
        }
        Ok(rx)
    }
}
