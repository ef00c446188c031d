//! The out-of-scope agent SDK boundary (§4.H): `AgentClient` is the seam
//! between this crate's fully-implemented driver loop and whatever
//! service actually runs the persistent LLM session. A real deployment
//! wires in the vendor SDK client; tests wire in a stub.

use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("session error: {0}")]
    Session(String),
    #[error("send failed: {0}")]
    Send(String),
}

/// One increment of a streamed turn response.
#[derive(Debug, Clone)]
pub enum TurnStreamEvent {
    Delta(String),
    Final(String),
    Error(String),
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn create_session(&self) -> Result<String, ClientError>;
    async fn resume_session(&self, session_id: &str) -> Result<String, ClientError>;
    async fn send_and_stream(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<mpsc::Receiver<TurnStreamEvent>, ClientError>;
}
