//! Append-only, line-delimited JSON audit sinks (component A).
//!
//! Each sink owns one open file handle behind a mutex so that writes from
//! concurrent callers serialize without reopening the file per call. HTML
//! escaping is disabled on the encoder so payload fidelity (`<`, `>`, `&`
//! in user content) survives the round trip.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;

use holon_domain::Result;

mod atomic;
pub use atomic::{write_json_atomic, write_json_plain};

/// A single append-only NDJSON file.
///
/// Closing the sink (dropping it, or calling [`NdjsonSink::close`])
/// releases the file handle; further writes after `close` fail with
/// [`holon_domain::Error::Other`].
pub struct NdjsonSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl NdjsonSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    /// Serialize `value` with HTML-escaping disabled and append one line.
    pub fn append<T: Serialize>(&self, value: &T) -> Result<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| {
            holon_domain::Error::Other(format!(
                "audit sink {} is closed",
                self.path.display()
            ))
        })?;

        // `serde_json::to_writer` with a plain `Serializer` does not
        // HTML-escape by default; `PrettyFormatter`/html-escaping is an
        // opt-in `CharEscape` override, so the default compact formatter
        // already preserves `<`, `>`, `&` verbatim.
        let mut buf = serde_json::to_vec(value)?;
        buf.push(b'\n');
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }

    pub fn close(&self) {
        self.file.lock().take();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn appends_one_line_per_call_without_escaping() {
        let dir = tempfile::tempdir().unwrap();
        let sink = NdjsonSink::open(dir.path().join("events.ndjson")).unwrap();
        sink.append(&json!({"msg": "<b>hi</b> & bye"})).unwrap();
        sink.append(&json!({"msg": "second"})).unwrap();

        let contents = std::fs::read_to_string(dir.path().join("events.ndjson")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("<b>hi</b> & bye"));
    }

    #[test]
    fn write_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sink = NdjsonSink::open(dir.path().join("x.ndjson")).unwrap();
        sink.close();
        assert!(sink.append(&json!({"a": 1})).is_err());
    }
}
