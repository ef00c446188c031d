//! The controller session driver (component H) event loop: start or resume
//! the session, send the bootstrap prompt, then tail the event channel file
//! one whole-line batch at a time, running one streamed turn per line and
//! appending one ack per turn. Grounded on `gateway::runtime::turn::run_turn`'s
//! "build context, call provider, stream events, finalize" shape, generalized
//! from an in-process tool loop to a single external `send`-per-event call.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use holon_domain::AckStatus;
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ack::AckWriter;
use crate::client::{AgentClient, TurnStreamEvent};
use crate::cursor::{self, Cursor};
use crate::session_state;

const MAX_BATCH_BYTES: u64 = 1024 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Stand-in for "no timeout" in a branch gated by an `if` guard — large
/// enough to never fire, small enough to not overflow `Instant` arithmetic.
const NO_TIMEOUT: Duration = Duration::from_secs(315_360_000);

const BOOTSTRAP_PROMPT: &str = "Controller session starting. Acknowledge readiness; further turns will arrive one per subscribed event.";

#[derive(Debug, Clone, Deserialize)]
struct ChannelEvent {
    turn_id: String,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    event_id: Option<String>,
    text: String,
}

pub struct Driver<C: AgentClient> {
    config: holon_domain::config::ControllerConfig,
    client: Arc<C>,
}

impl<C: AgentClient> Driver<C> {
    pub fn new(config: holon_domain::config::ControllerConfig, client: Arc<C>) -> Self {
        Self { config, client }
    }

    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let event_channel_path = PathBuf::from(&self.config.event_channel_path);
        let cursor_path = PathBuf::from(&self.config.event_cursor_path);
        let session_state_path = PathBuf::from(&self.config.session_state_path);
        let ack_writer = AckWriter::open(self.config.ack_channel_path.as_ref().map(Path::new))?;

        let (session_id, mode) = self.start_session(&session_state_path).await?;
        session_state::save(&session_state_path, &session_id, mode)?;
        tracing::info!(session_id = %session_id, mode, "controller session ready");

        let session_start = Instant::now();
        let total_timeout = Duration::from_secs(self.config.total_timeout_seconds);
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_seconds);
        let query_timeout = Duration::from_secs(self.config.query_timeout_seconds);

        self.run_one_turn(
            &session_id,
            BOOTSTRAP_PROMPT,
            session_start,
            total_timeout,
            idle_timeout,
            Some(query_timeout),
            None,
            &ack_writer,
        )
        .await?;

        let mut offset = cursor::resolve_offset(&event_channel_path, cursor::load(&cursor_path));
        let mut heartbeat = tokio::time::interval(Duration::from_secs(self.config.heartbeat_seconds.max(1)));
        heartbeat.tick().await;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            if session_start.elapsed() >= total_timeout {
                tracing::warn!("controller total session timeout reached, stopping driver");
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = heartbeat.tick() => {
                    tracing::debug!("controller heartbeat");
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    let (lines, new_offset) = read_batch(&event_channel_path, offset).await?;
                    if lines.is_empty() {
                        continue;
                    }
                    for line in &lines {
                        let event: ChannelEvent = match serde_json::from_str(line) {
                            Ok(e) => e,
                            Err(err) => {
                                tracing::warn!(error = %err, line, "skipping malformed channel line");
                                continue;
                            }
                        };
                        if let Err(err) = self
                            .run_one_turn(
                                &session_id,
                                &event.text,
                                session_start,
                                total_timeout,
                                idle_timeout,
                                None,
                                Some(&event),
                                &ack_writer,
                            )
                            .await
                        {
                            tracing::error!(error = %err, turn_id = %event.turn_id, "turn failed");
                        }
                    }
                    offset = new_offset;
                    cursor::save(&cursor_path, Cursor { offset })?;
                }
            }
        }
        Ok(())
    }

    async fn start_session(&self, session_state_path: &Path) -> anyhow::Result<(String, &'static str)> {
        if let Some(id) = &self.config.resume_session_id {
            let session_id = self
                .client
                .resume_session(id)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            return Ok((session_id, "resumed"));
        }
        if let Some(existing) = session_state::load(session_state_path) {
            if let Some(id) = existing.session_id {
                if let Ok(session_id) = self.client.resume_session(&id).await {
                    return Ok((session_id, "resumed"));
                }
            }
        }
        let session_id = self
            .client
            .create_session()
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok((session_id, "created"))
    }

    /// Run one turn with the three timeouts from §5 applied simultaneously:
    /// idle resets on every delta, total is pinned to session start, the
    /// query timeout only applies when `initial_query_timeout` is `Some`
    /// (the bootstrap turn). Whichever fires first aborts the stream.
    #[allow(clippy::too_many_arguments)]
    async fn run_one_turn(
        &self,
        session_id: &str,
        text: &str,
        session_start: Instant,
        total_timeout: Duration,
        idle_timeout: Duration,
        initial_query_timeout: Option<Duration>,
        event: Option<&ChannelEvent>,
        ack_writer: &AckWriter,
    ) -> anyhow::Result<()> {
        let turn_id = event
            .map(|e| e.turn_id.clone())
            .unwrap_or_else(|| format!("bootstrap-{}", uuid::Uuid::new_v4()));

        let mut rx = self
            .client
            .send_and_stream(session_id, text)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        let total_remaining = total_timeout
            .saturating_sub(session_start.elapsed())
            .max(Duration::from_millis(1));
        let has_query_timeout = initial_query_timeout.is_some();

        let total_sleep = tokio::time::sleep(total_remaining);
        tokio::pin!(total_sleep);
        let idle_sleep = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle_sleep);
        let query_sleep = tokio::time::sleep(initial_query_timeout.unwrap_or(NO_TIMEOUT));
        tokio::pin!(query_sleep);

        let mut final_text: Option<String> = None;
        let mut error: Option<String> = None;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(TurnStreamEvent::Delta(_)) => {
                            idle_sleep.as_mut().reset(Instant::now() + idle_timeout);
                        }
                        Some(TurnStreamEvent::Final(text)) => {
                            final_text = Some(text);
                            break;
                        }
                        Some(TurnStreamEvent::Error(e)) => {
                            error = Some(e);
                            break;
                        }
                        None => break,
                    }
                }
                _ = &mut idle_sleep => {
                    error = Some("idle timeout".to_string());
                    break;
                }
                _ = &mut total_sleep => {
                    error = Some("total session timeout".to_string());
                    break;
                }
                _ = &mut query_sleep, if has_query_timeout => {
                    error = Some("initial query timeout".to_string());
                    break;
                }
            }
        }

        let status = if error.is_some() { AckStatus::Failed } else { AckStatus::Completed };
        let _ = final_text;
        ack_writer.ack(
            event.and_then(|e| e.event_id.clone()),
            turn_id,
            event.and_then(|e| e.thread_id.clone()),
            status,
            error.clone(),
        )?;

        if let Some(e) = error {
            anyhow::bail!(e);
        }
        Ok(())
    }
}

/// Read whole lines starting at `offset`, stopping before any line without
/// a trailing newline (partial write) and once `MAX_BATCH_BYTES` have been
/// consumed. Returns the lines read and the new offset.
async fn read_batch(path: &Path, offset: u64) -> std::io::Result<(Vec<String>, u64)> {
    use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), offset)),
        Err(e) => return Err(e),
    };
    let len = file.metadata().await?.len();
    let start = if offset > len { 0 } else { offset };
    file.seek(std::io::SeekFrom::Start(start)).await?;
    let mut reader = BufReader::new(file);

    let mut lines = Vec::new();
    let mut consumed: u64 = 0;
    loop {
        if consumed >= MAX_BATCH_BYTES {
            break;
        }
        let mut buf = String::new();
        let n = reader.read_line(&mut buf).await?;
        if n == 0 || !buf.ends_with('\n') {
            break;
        }
        consumed += n as u64;
        let trimmed = buf.trim_end();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    Ok((lines, start + consumed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn read_batch_stops_before_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event-channel.ndjson");
        std::fs::write(&path, b"{\"a\":1}\n{\"a\":2}\nunterminat").unwrap();
        let (lines, offset) = read_batch(&path, 0).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(offset, b"{\"a\":1}\n{\"a\":2}\n".len() as u64);
    }

    #[tokio::test]
    async fn read_batch_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.ndjson");
        let (lines, offset) = read_batch(&path, 7).await.unwrap();
        assert!(lines.is_empty());
        assert_eq!(offset, 7);
    }

    struct StubClient {
        stream: std::sync::Mutex<Option<Vec<TurnStreamEvent>>>,
    }

    #[async_trait::async_trait]
    impl AgentClient for StubClient {
        async fn create_session(&self) -> Result<String, crate::client::ClientError> {
            Ok("sess-new".to_string())
        }
        async fn resume_session(&self, session_id: &str) -> Result<String, crate::client::ClientError> {
            Ok(session_id.to_string())
        }
        async fn send_and_stream(
            &self,
            _session_id: &str,
            _text: &str,
        ) -> Result<mpsc::Receiver<TurnStreamEvent>, crate::client::ClientError> {
            let events = self.stream.lock().unwrap().take().unwrap_or_default();
            let (tx, rx) = mpsc::channel(events.len().max(1));
            tokio::spawn(async move {
                for e in events {
                    let _ = tx.send(e).await;
                }
            });
            Ok(rx)
        }
    }

    fn base_config(dir: &std::path::Path) -> holon_domain::config::ControllerConfig {
        holon_domain::config::ControllerConfig {
            event_channel_path: dir.join("event-channel.ndjson").to_string_lossy().into_owned(),
            event_cursor_path: dir.join("event-channel.cursor").to_string_lossy().into_owned(),
            ack_channel_path: Some(dir.join("acks.ndjson").to_string_lossy().into_owned()),
            session_state_path: dir.join("session-state.json").to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn run_one_turn_completes_and_acks_on_final_event() {
        let dir = tempfile::tempdir().unwrap();
        let config = base_config(dir.path());
        let client = Arc::new(StubClient {
            stream: std::sync::Mutex::new(Some(vec![
                TurnStreamEvent::Delta("partial".into()),
                TurnStreamEvent::Final("done".into()),
            ])),
        });
        let driver = Driver::new(config.clone(), client);
        let ack_writer = AckWriter::open(config.ack_channel_path.as_deref().map(Path::new)).unwrap();
        driver
            .run_one_turn(
                "sess-1",
                "hi",
                Instant::now(),
                Duration::from_secs(10),
                Duration::from_secs(10),
                None,
                None,
                &ack_writer,
            )
            .await
            .unwrap();
        let acks = std::fs::read_to_string(config.ack_channel_path.unwrap()).unwrap();
        assert!(acks.contains("\"completed\""));
    }

    #[tokio::test]
    async fn run_one_turn_fails_on_idle_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let config = base_config(dir.path());
        let client = Arc::new(StubClient {
            stream: std::sync::Mutex::new(Some(Vec::new())),
        });
        let driver = Driver::new(config.clone(), client);
        let ack_writer = AckWriter::open(config.ack_channel_path.as_deref().map(Path::new)).unwrap();
        let result = driver
            .run_one_turn(
                "sess-1",
                "hi",
                Instant::now(),
                Duration::from_secs(10),
                Duration::from_millis(30),
                None,
                None,
                &ack_writer,
            )
            .await;
        assert!(result.is_err());
        let acks = std::fs::read_to_string(config.ack_channel_path.unwrap()).unwrap();
        assert!(acks.contains("\"failed\""));
    }

    #[tokio::test]
    async fn start_session_resumes_from_saved_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = base_config(dir.path());
        session_state::save(Path::new(&config.session_state_path), "sess-old", "created").unwrap();
        let client = Arc::new(StubClient {
            stream: std::sync::Mutex::new(None),
        });
        let driver = Driver::new(config.clone(), client);
        let (session_id, mode) = driver
            .start_session(Path::new(&config.session_state_path))
            .await
            .unwrap();
        assert_eq!(session_id, "sess-old");
        assert_eq!(mode, "resumed");
    }
}
