//! Event service (component D) — dedupe → audit → forward to handler →
//! advance cursor. The single-writer processing pipeline; every envelope,
//! whatever transport produced it, passes through [`EventService::process`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use holon_audit::NdjsonSink;
use holon_domain::{EventEnvelope, Result};

use crate::store::PersistentStateStore;

/// The pluggable sink for forwarded envelopes. Implementations live
/// upstream of this crate (the RPC runtime's dispatcher, a test double).
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, envelope: &EventEnvelope) -> std::result::Result<(), HandlerError>;
}

/// A handler's outcome, classified into the three statuses §4.D records.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Sentinel: an intentional, non-failing skip requested by the handler.
    #[error("skip: {0}")]
    Skip(String),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The handler was not invoked; `dedupe_key` was already in the window.
    DuplicateSkipped,
    Forwarded(ForwardStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardStatus {
    Ok,
    Skipped,
    Failed,
}

#[derive(Serialize)]
struct DecisionRecord<'a> {
    event_id: &'a str,
    dedupe_key: &'a str,
    skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    decision_type: Option<&'a str>,
    at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ActionRecord<'a> {
    event_id: &'a str,
    dedupe_key: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
}

struct Inner {
    store: PersistentStateStore,
    events_log: NdjsonSink,
    decisions_log: NdjsonSink,
    actions_log: NdjsonSink,
    handler: Arc<dyn EventHandler>,
}

/// `events.ndjson` / `decisions.ndjson` / `actions.ndjson` + `serve-state.json`
/// inside `state_dir`, all mutated under one lock.
pub struct EventService {
    inner: Mutex<Inner>,
}

impl EventService {
    pub fn new(state_dir: impl AsRef<Path>, handler: Arc<dyn EventHandler>) -> Result<Self> {
        let dir = state_dir.as_ref();
        let store = PersistentStateStore::load(dir.join("serve-state.json"))?;
        let events_log = NdjsonSink::open(dir.join("events.ndjson"))?;
        let decisions_log = NdjsonSink::open(dir.join("decisions.ndjson"))?;
        let actions_log = NdjsonSink::open(dir.join("actions.ndjson"))?;
        Ok(Self {
            inner: Mutex::new(Inner {
                store,
                events_log,
                decisions_log,
                actions_log,
                handler,
            }),
        })
    }

    pub fn last_event_id_sync(&self) -> String {
        self.inner
            .try_lock()
            .map(|g| g.store.last_event_id().to_string())
            .unwrap_or_default()
    }

    /// Process one envelope through dedupe → audit → handler → cursor
    /// advance. Internal callers (timers, the websocket source) call this
    /// exact same method — there is no separate "inject" code path.
    pub async fn process(&self, envelope: EventEnvelope) -> Result<ProcessOutcome> {
        let mut guard = self.inner.lock().await;
        let Inner {
            store,
            events_log,
            decisions_log,
            actions_log,
            handler,
        } = &mut *guard;

        // 1. Append to events log (always, before any dedupe decision).
        events_log.append(&envelope)?;

        // 2. Dedupe check.
        if store.has_processed(&envelope.dedupe_key) {
            decisions_log.append(&DecisionRecord {
                event_id: &envelope.id,
                dedupe_key: &envelope.dedupe_key,
                skipped: true,
                reason: Some("duplicate dedupe_key"),
                decision_type: None,
                at: Utc::now(),
            })?;
            // Duplicates still advance last_event_id to avoid replay loops.
            store.advance_last_event_id(&envelope.id)?;
            return Ok(ProcessOutcome::DuplicateSkipped);
        }

        // 3. Forward decision.
        decisions_log.append(&DecisionRecord {
            event_id: &envelope.id,
            dedupe_key: &envelope.dedupe_key,
            skipped: false,
            reason: None,
            decision_type: Some("forward_event"),
            at: Utc::now(),
        })?;

        // 4. Invoke handler, classify outcome.
        let started_at = Utc::now();
        let (status, message) = match handler.handle_event(&envelope).await {
            Ok(()) => (ForwardStatus::Ok, None),
            Err(HandlerError::Skip(msg)) => (ForwardStatus::Skipped, Some(msg)),
            Err(HandlerError::Failed(msg)) => (ForwardStatus::Failed, Some(msg)),
        };
        let ended_at = Utc::now();

        // 5. Record action result, advance cursor + dedupe window.
        actions_log.append(&ActionRecord {
            event_id: &envelope.id,
            dedupe_key: &envelope.dedupe_key,
            status: match status {
                ForwardStatus::Ok => "ok",
                ForwardStatus::Skipped => "skipped",
                ForwardStatus::Failed => "failed",
            },
            message: message.as_deref(),
            started_at,
            ended_at,
        })?;
        store.mark_processed(&envelope.dedupe_key, &envelope.id, &ended_at.to_rfc3339())?;

        Ok(ProcessOutcome::Forwarded(status))
    }

    /// Alias exposed for internal producers (timers, websocket reconnects)
    /// that need the identical path as ingress — there is deliberately no
    /// separate implementation to keep in sync.
    pub async fn inject_event(&self, envelope: EventEnvelope) -> Result<ProcessOutcome> {
        self.process(envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holon_domain::{next_id, Scope, Subject};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle_event(&self, _envelope: &EventEnvelope) -> std::result::Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn envelope(dedupe_key: &str) -> EventEnvelope {
        EventEnvelope {
            id: next_id("evt"),
            source: "github".into(),
            kind: "github.issue_comment.comment.created".into(),
            at: Utc::now(),
            scope: Scope {
                tenant: None,
                repo: Some("org/repo".into()),
            },
            subject: Subject {
                kind: "issue".into(),
                id: "527".into(),
            },
            dedupe_key: dedupe_key.into(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn duplicate_dedupe_key_invokes_handler_at_most_once() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let service = EventService::new(dir.path(), handler.clone()).unwrap();

        let e1 = envelope("github:delivery:d-1");
        let e2 = envelope("github:delivery:d-1");
        let o1 = service.process(e1.clone()).await.unwrap();
        let o2 = service.process(e2.clone()).await.unwrap();

        assert_eq!(o1, ProcessOutcome::Forwarded(ForwardStatus::Ok));
        assert_eq!(o2, ProcessOutcome::DuplicateSkipped);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        let events = std::fs::read_to_string(dir.path().join("events.ndjson")).unwrap();
        assert_eq!(events.lines().count(), 2);

        assert_eq!(service.last_event_id_sync(), e2.id);
    }

    #[tokio::test]
    async fn distinct_dedupe_keys_both_invoke_handler() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let service = EventService::new(dir.path(), handler.clone()).unwrap();

        service.process(envelope("k1")).await.unwrap();
        service.process(envelope("k2")).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    struct SkippingHandler;
    #[async_trait]
    impl EventHandler for SkippingHandler {
        async fn handle_event(&self, _e: &EventEnvelope) -> std::result::Result<(), HandlerError> {
            Err(HandlerError::Skip("not relevant".into()))
        }
    }

    #[tokio::test]
    async fn handler_skip_does_not_halt_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let service = EventService::new(dir.path(), Arc::new(SkippingHandler)).unwrap();
        let outcome = service.process(envelope("k1")).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Forwarded(ForwardStatus::Skipped));
    }
}
