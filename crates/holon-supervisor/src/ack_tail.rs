//! Ack-file tailer — the missing link the spec's data-flow diagram names
//! but does not assign to a component: `acks file → handle_turn_ack →
//! broadcastNotifications`. Polls `ack_channel_path` for newly appended
//! whole lines and feeds each parsed [`TurnAckRecord`] into
//! [`holon_rpc::Runtime::handle_turn_ack`].
//!
//! Tailing starts from end-of-file at boot: there is no persisted ack
//! cursor (only `event-channel.cursor` is a durable file per the file
//! layout), so acks written before this process started are not replayed.

use std::path::PathBuf;
use std::time::Duration;

use holon_domain::TurnAckRecord;
use holon_rpc::Runtime;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn spawn_ack_tail(ack_channel_path: PathBuf, runtime: std::sync::Arc<Runtime>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(parent) = ack_channel_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if !ack_channel_path.exists() {
            let _ = tokio::fs::write(&ack_channel_path, b"").await;
        }

        let mut offset = match tokio::fs::metadata(&ack_channel_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            match read_new_lines(&ack_channel_path, &mut offset).await {
                Ok(lines) => {
                    for line in lines {
                        apply_line(&runtime, &line);
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "ack tail: read failed, will retry");
                }
            }
        }
    })
}

/// Reads whatever has been appended since `offset`, advances `offset` to
/// the new end, and tolerates truncation (offset beyond file length
/// resets to zero rather than erroring).
async fn read_new_lines(path: &std::path::Path, offset: &mut u64) -> std::io::Result<Vec<String>> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    if len < *offset {
        *offset = 0;
    }
    file.seek(std::io::SeekFrom::Start(*offset)).await?;

    let mut reader = tokio::io::BufReader::new(file);
    let mut lines = Vec::new();
    let mut consumed: u64 = 0;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break;
        }
        if !line.ends_with('\n') {
            // Partial line at EOF; don't consume it, wait for the rest.
            break;
        }
        consumed += n as u64;
        lines.push(line.trim_end().to_string());
    }
    *offset += consumed;
    Ok(lines)
}

fn apply_line(runtime: &Runtime, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    match serde_json::from_str::<TurnAckRecord>(line) {
        Ok(record) => {
            runtime.handle_turn_ack(&record.turn_id, record.status, record.message.as_deref());
        }
        Err(e) => {
            tracing::warn!(error = %e, line = %line, "ack tail: malformed ack record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_only_complete_lines_and_tolerates_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acks.ndjson");
        tokio::fs::write(&path, b"{\"turn_id\":\"t1\",\"status\":\"completed\",\"at\":\"2026-01-01T00:00:00Z\"}\n").await.unwrap();

        let mut offset = 0u64;
        let lines = read_new_lines(&path, &mut offset).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(offset, tokio::fs::metadata(&path).await.unwrap().len());

        // Append a partial line (no trailing newline) - should not be read yet.
        let mut file = tokio::fs::OpenOptions::new().append(true).open(&path).await.unwrap();
        use tokio::io::AsyncWriteExt;
        file.write_all(b"{\"turn_id\":\"t2\"").await.unwrap();
        drop(file);
        let lines2 = read_new_lines(&path, &mut offset).await.unwrap();
        assert!(lines2.is_empty());

        // Truncate the file (simulating rotation) and confirm offset resets.
        tokio::fs::write(&path, b"short\n").await.unwrap();
        let lines3 = read_new_lines(&path, &mut offset).await.unwrap();
        assert_eq!(offset, 6);
        assert_eq!(lines3, vec!["short".to_string()]);
    }
}
