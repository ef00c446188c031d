//! [`EventEnvelope`] — the canonical unit crossing every internal boundary.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic counter used, alongside a nanosecond timestamp, to build
/// globally-unique envelope ids within a process lifetime.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate an id of the form `{prefix}-{nanos}-{counter}`.
pub fn next_id(prefix: &str) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{nanos}-{counter}")
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Scope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    /// e.g. `issue`, `pull_request`, `timer`.
    pub kind: String,
    pub id: String,
}

impl Default for Subject {
    fn default() -> Self {
        Self {
            kind: String::new(),
            id: String::new(),
        }
    }
}

/// The canonical internal representation of an external or synthetic event.
///
/// Every component from the event service onward operates purely on this
/// type; platform-specific JSON never crosses component D's boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub scope: Scope,
    pub subject: Subject,
    #[serde(default)]
    pub dedupe_key: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// True when the envelope satisfies the invariant required before it
    /// may enter the event service: non-empty `id`, non-zero `at`,
    /// non-empty `type`, and (unless `type` is also empty) a non-empty
    /// `dedupe_key`.
    pub fn is_well_formed(&self) -> bool {
        if self.id.is_empty() || self.kind.is_empty() {
            return false;
        }
        if self.at.timestamp() == 0 && self.at.timestamp_subsec_nanos() == 0 {
            return false;
        }
        !self.dedupe_key.is_empty()
    }

    pub fn repo(&self) -> &str {
        self.scope.repo.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = next_id("evt");
        let b = next_id("evt");
        assert_ne!(a, b);
        assert!(a.starts_with("evt-"));
    }

    #[test]
    fn well_formed_requires_dedupe_key() {
        let mut env = EventEnvelope {
            id: "e1".into(),
            source: "github".into(),
            kind: "github.issue.opened".into(),
            at: Utc::now(),
            scope: Scope::default(),
            subject: Subject {
                kind: "issue".into(),
                id: "1".into(),
            },
            dedupe_key: String::new(),
            payload: serde_json::Value::Null,
        };
        assert!(!env.is_well_formed());
        env.dedupe_key = "github:org/repo:issue:1:github.issue.opened".into();
        assert!(env.is_well_formed());
    }
}
