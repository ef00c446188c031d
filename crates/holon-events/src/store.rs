//! Persistent state store (component B).

use std::path::{Path, PathBuf};

use holon_audit::write_json_plain;
use holon_domain::{PersistentState, Result};

/// Loaded on construction; a missing file initializes defaults without
/// error. Saves are synchronous, whole-file, non-atomic rewrites.
pub struct PersistentStateStore {
    path: PathBuf,
    state: PersistentState,
}

impl PersistentStateStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistentState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, state })
    }

    pub fn state(&self) -> &PersistentState {
        &self.state
    }

    pub fn last_event_id(&self) -> &str {
        &self.state.last_event_id
    }

    pub fn has_processed(&self, dedupe_key: &str) -> bool {
        self.state.processed_at.contains_key(dedupe_key)
    }

    /// Record `dedupe_key` as processed at `at`, advance `last_event_id`,
    /// compact if over `processed_max`, and save.
    pub fn mark_processed(&mut self, dedupe_key: &str, event_id: &str, at: &str) -> Result<()> {
        self.state
            .processed_at
            .insert(dedupe_key.to_string(), at.to_string());
        self.state.last_event_id = event_id.to_string();
        self.state.compact();
        self.save()
    }

    /// Advance `last_event_id` without recording a new dedupe entry
    /// (the duplicate-skip path still must not replay).
    pub fn advance_last_event_id(&mut self, event_id: &str) -> Result<()> {
        self.state.last_event_id = event_id.to_string();
        self.save()
    }

    fn save(&self) -> Result<()> {
        write_json_plain(&self.path, &self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_initializes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistentStateStore::load(dir.path().join("serve-state.json")).unwrap();
        assert_eq!(store.last_event_id(), "");
    }

    #[test]
    fn mark_processed_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serve-state.json");
        let mut store = PersistentStateStore::load(&path).unwrap();
        store.mark_processed("k1", "evt-1", "2025-01-01T00:00:00Z").unwrap();

        let reloaded = PersistentStateStore::load(&path).unwrap();
        assert!(reloaded.has_processed("k1"));
        assert_eq!(reloaded.last_event_id(), "evt-1");
    }

    #[test]
    fn compaction_caps_processed_at_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PersistentStateStore::load(dir.path().join("s.json")).unwrap();
        for i in 0..5 {
            store.state.processed_max = 3;
            store
                .mark_processed(
                    &format!("k{i}"),
                    &format!("evt-{i}"),
                    &format!("2025-01-0{}T00:00:00Z", i + 1),
                )
                .unwrap();
        }
        assert!(store.state.processed_at.len() <= 3);
    }
}
