//! The dispatch seam between F (RPC turn state machine) and H (the
//! controller driver), and between D (event service) and H.
//!
//! Both paths ultimately do the same thing: append one line to the
//! file-backed event channel that `holon-controller` tails. `ChannelDispatcher`
//! is the single implementation of both seams so that RPC-originated turns
//! and webhook-originated events cross the same durable boundary.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use holon_domain::EventEnvelope;
use holon_events::{EventHandler, HandlerError};
use parking_lot::Mutex;
use serde::Serialize;

use crate::input::ValidatedMessage;

#[async_trait]
pub trait TurnDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        turn_id: &str,
        thread_id: &str,
        input: &[ValidatedMessage],
    ) -> Result<(), String>;
}

/// One line appended to the event-channel file `holon-controller` reads.
#[derive(Serialize)]
struct ChannelLine<'a> {
    turn_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<&'a str>,
    text: String,
    at: chrono::DateTime<Utc>,
}

pub struct ChannelDispatcher {
    channel_path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl ChannelDispatcher {
    pub fn open(channel_path: impl Into<PathBuf>) -> holon_domain::Result<Self> {
        let channel_path = channel_path.into();
        if let Some(parent) = channel_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&channel_path)?;
        Ok(Self {
            channel_path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.channel_path
    }

    fn append_line(&self, line: &ChannelLine<'_>) -> holon_domain::Result<()> {
        use std::io::Write;
        let mut buf = serde_json::to_vec(line)?;
        buf.push(b'\n');
        let mut file = self.file.lock();
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }
}

#[async_trait]
impl TurnDispatcher for ChannelDispatcher {
    async fn dispatch(
        &self,
        turn_id: &str,
        thread_id: &str,
        input: &[ValidatedMessage],
    ) -> Result<(), String> {
        let text = input
            .iter()
            .flat_map(|m| m.texts.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        self.append_line(&ChannelLine {
            turn_id,
            thread_id: Some(thread_id),
            event_id: None,
            text,
            at: Utc::now(),
        })
        .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl EventHandler for ChannelDispatcher {
    async fn handle_event(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let text = format!(
            "[{}] {} on {} #{}",
            envelope.kind,
            envelope.source,
            envelope.repo(),
            envelope.subject.id
        );
        self.append_line(&ChannelLine {
            turn_id: &envelope.id,
            thread_id: None,
            event_id: Some(&envelope.id),
            text,
            at: envelope.at,
        })
        .map_err(HandlerError::Failed)
    }
}

/// Wraps an `Arc<ChannelDispatcher>` so one instance can serve both
/// trait objects without cloning the file handle.
pub fn as_turn_dispatcher(d: Arc<ChannelDispatcher>) -> Arc<dyn TurnDispatcher> {
    d
}

pub fn as_event_handler(d: Arc<ChannelDispatcher>) -> Arc<dyn EventHandler> {
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_appends_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = ChannelDispatcher::open(dir.path().join("channel.ndjson")).unwrap();
        let msg = ValidatedMessage {
            role: "user".into(),
            texts: vec!["hello".into()],
        };
        dispatcher.dispatch("turn-1", "thread-1", &[msg]).await.unwrap();
        let contents = std::fs::read_to_string(dir.path().join("channel.ndjson")).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("hello"));
    }
}
