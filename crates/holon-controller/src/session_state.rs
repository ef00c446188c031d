//! `{session_id?, mode, updated_at}` — written atomically after every
//! session-lifecycle transition (create, resume) so an operator can see
//! which logical session this driver is bound to without reading logs.

use std::path::Path;

use chrono::{DateTime, Utc};
use holon_audit::write_json_atomic;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// `"created"` | `"resumed"`.
    pub mode: String,
    pub updated_at: DateTime<Utc>,
}

pub fn load(path: &Path) -> Option<SessionState> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
}

pub fn save(path: &Path, session_id: &str, mode: &str) -> holon_domain::Result<()> {
    write_json_atomic(
        path,
        &SessionState {
            session_id: Some(session_id.to_string()),
            mode: mode.to_string(),
            updated_at: Utc::now(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session-state.json");
        save(&path, "sess-1", "created").unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.session_id.as_deref(), Some("sess-1"));
        assert_eq!(loaded.mode, "created");
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("nope.json")).is_none());
    }
}
