//! `tmp-file + rename` atomic JSON writes, used by [`RuntimeState`] and the
//! subscription supervisor's status snapshot so that concurrent readers
//! never observe a partially-written file.

use std::path::Path;

use serde::Serialize;

use holon_domain::Result;

pub fn write_json_atomic<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("json")
    ));
    let body = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp_path, body)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Non-atomic pretty-printed rewrite, used for [`holon_domain::PersistentState`]
/// which the spec deliberately keeps audit-style (direct `fs::write`).
pub fn write_json_plain<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn atomic_write_survives_concurrent_read_of_prior_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime-state.json");
        write_json_atomic(&path, &json!({"state": "running"})).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        assert!(first.contains("running"));

        write_json_atomic(&path, &json!({"state": "paused"})).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert!(second.contains("paused"));
        assert!(!dir.path().join("runtime-state.json.tmp").exists());
    }
}
