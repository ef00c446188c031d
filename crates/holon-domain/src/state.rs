//! Process-wide persisted state: dedupe window, runtime pause/resume state,
//! and the turn-acknowledgment wire record written by the controller driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_processed_max() -> usize {
    2000
}

/// Guarded by a mutex in the owning component; serialized as pretty-printed
/// JSON at a known path. Writes are a direct (non-atomic) `fs::write` —
/// see [`crate::config::ServerConfig`] for the atomic variants used by
/// [`RuntimeState`] and the supervisor's status file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentState {
    #[serde(default)]
    pub last_event_id: String,
    #[serde(default)]
    pub processed_at: HashMap<String, String>,
    #[serde(default = "default_processed_max")]
    pub processed_max: usize,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self {
            last_event_id: String::new(),
            processed_at: HashMap::new(),
            processed_max: default_processed_max(),
        }
    }
}

impl PersistentState {
    /// Drop the oldest entries (by parsed timestamp; malformed timestamps
    /// sort as zero and are dropped first) until `processed_at` is at most
    /// `processed_max` long.
    pub fn compact(&mut self) {
        if self.processed_at.len() <= self.processed_max {
            return;
        }
        let mut entries: Vec<(String, i64)> = self
            .processed_at
            .iter()
            .map(|(k, v)| {
                let ts = DateTime::parse_from_rfc3339(v)
                    .map(|d| d.timestamp_nanos_opt().unwrap_or(0))
                    .unwrap_or(0);
                (k.clone(), ts)
            })
            .collect();
        // Newest first; truncate the tail (oldest / malformed).
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(self.processed_max);
        let keep: std::collections::HashSet<String> =
            entries.into_iter().map(|(k, _)| k).collect();
        self.processed_at.retain(|k, _| keep.contains(k));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Paused,
}

impl Default for RunState {
    fn default() -> Self {
        RunState::Running
    }
}

/// Persisted across restarts as `runtime-state.json`, written atomically
/// (tmp-file + rename).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeState {
    #[serde(default)]
    pub state: RunState,
    #[serde(default)]
    pub events_processed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_at: Option<DateTime<Utc>>,
    /// Assigned on first use, sticky for the runtime's lifetime.
    #[serde(default)]
    pub controller_session_id: String,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            state: RunState::Running,
            events_processed: 0,
            last_event_at: None,
            paused_at: None,
            resumed_at: None,
            controller_session_id: String::new(),
        }
    }
}

/// Status reported by the controller driver for one processed event,
/// appended as line-delimited JSON to the ack file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Completed,
    Failed,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnAckRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub turn_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_keeps_newest_and_drops_malformed() {
        let mut s = PersistentState {
            processed_max: 2,
            ..Default::default()
        };
        s.processed_at
            .insert("a".into(), "not-a-timestamp".into());
        s.processed_at
            .insert("b".into(), "2020-01-01T00:00:00Z".into());
        s.processed_at
            .insert("c".into(), "2025-01-01T00:00:00Z".into());
        s.compact();
        assert_eq!(s.processed_at.len(), 2);
        assert!(!s.processed_at.contains_key("a"));
        assert!(s.processed_at.contains_key("c"));
    }
}
