//! The event-channel cursor file: a single `u64` byte offset, written
//! atomically. Offsets beyond the current event channel's length are
//! treated as stale and reset to 0 (truncation tolerance — mirrors
//! `holon_domain::PersistentState`'s general resync-from-zero stance on
//! any value that can no longer be trusted).

use std::path::{Path, PathBuf};

use holon_audit::write_json_atomic;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Cursor {
    pub offset: u64,
}

pub fn load(cursor_path: &Path) -> Cursor {
    std::fs::read_to_string(cursor_path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

pub fn save(cursor_path: &Path, cursor: Cursor) -> holon_domain::Result<()> {
    write_json_atomic(cursor_path, &cursor)
}

/// Resolve `cursor` against the live length of `event_channel_path`: if
/// the recorded offset exceeds the file's current size (truncation,
/// rotation, or a stale cursor from a different file), start from 0.
pub fn resolve_offset(event_channel_path: &Path, cursor: Cursor) -> u64 {
    let len = std::fs::metadata(event_channel_path)
        .map(|m| m.len())
        .unwrap_or(0);
    if cursor.offset > len {
        0
    } else {
        cursor.offset
    }
}

pub fn path_for(cursor_path: impl Into<PathBuf>) -> PathBuf {
    cursor_path.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_past_file_end_resets_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let channel = dir.path().join("event-channel.ndjson");
        std::fs::write(&channel, b"short\n").unwrap();
        let resolved = resolve_offset(&channel, Cursor { offset: 9999 });
        assert_eq!(resolved, 0);
    }

    #[test]
    fn offset_within_bounds_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let channel = dir.path().join("event-channel.ndjson");
        std::fs::write(&channel, b"0123456789\n").unwrap();
        let resolved = resolve_offset(&channel, Cursor { offset: 5 });
        assert_eq!(resolved, 5);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event-channel.cursor");
        save(&path, Cursor { offset: 42 }).unwrap();
        assert_eq!(load(&path).offset, 42);
    }
}
