//! The turn state machine (§4.F.2) and the runtime that owns it.
//!
//! States per turn: `(start) → active → (completed | interrupted)`. The
//! active-turns table is the single source of truth; both timer callbacks
//! and RPC handlers route through lock-scoped helpers so a reschedule can
//! never race a stale auto-complete fire (guarded by a generation counter,
//! never by timer-handle identity).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use holon_audit::write_json_atomic;
use holon_domain::{RunState, RuntimeState};
use parking_lot::Mutex;
use serde_json::json;
use uuid::Uuid;

use crate::broadcaster::Broadcaster;
use crate::dispatch::TurnDispatcher;
use crate::input::ValidatedMessage;
use crate::jsonrpc::{JsonRpcError, INTERNAL_ERROR};
use crate::Notification;

#[derive(Debug, Clone)]
pub struct ActiveTurn {
    pub id: String,
    pub thread_id: String,
    pub started_at: chrono::DateTime<Utc>,
    pub generation: u64,
}

struct TurnEntry {
    turn: ActiveTurn,
}

/// Result of `Runtime::interrupt` — `turn_id` is `None` when the call
/// paused the whole runtime rather than a single turn.
#[derive(Debug, Clone)]
pub struct InterruptOutcome {
    pub turn_id: Option<String>,
    pub interrupted_at: chrono::DateTime<Utc>,
    pub message: String,
}

/// Owns `runtime-state.json` and the in-memory active-turns table;
/// exclusively mutated under its internal locks.
pub struct Runtime {
    state_path: PathBuf,
    runtime_state: Mutex<RuntimeState>,
    active_turns: Mutex<HashMap<String, TurnEntry>>,
    generation_counter: AtomicU64,
    turn_idle_ttl: Duration,
    pub broadcaster: Arc<Broadcaster>,
    dispatcher: Arc<dyn TurnDispatcher>,
}

impl Runtime {
    pub fn new(
        state_path: impl Into<PathBuf>,
        turn_idle_ttl: Duration,
        broadcaster: Arc<Broadcaster>,
        dispatcher: Arc<dyn TurnDispatcher>,
    ) -> Arc<Self> {
        let state_path = state_path.into();
        let runtime_state = match std::fs::read_to_string(&state_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => RuntimeState::default(),
        };
        Arc::new(Self {
            state_path,
            runtime_state: Mutex::new(runtime_state),
            active_turns: Mutex::new(HashMap::new()),
            generation_counter: AtomicU64::new(0),
            turn_idle_ttl,
            broadcaster,
            dispatcher,
        })
    }

    fn save_state(&self) {
        let snapshot = self.runtime_state.lock().clone();
        if let Err(e) = write_json_atomic(&self.state_path, &snapshot) {
            tracing::warn!(error = %e, "failed to persist runtime state");
        }
    }

    pub fn status(&self) -> RuntimeState {
        self.runtime_state.lock().clone()
    }

    pub fn controller_session_id(&self) -> String {
        self.runtime_state.lock().controller_session_id.clone()
    }

    /// Assign the controller-session id the first time the SDK exposes
    /// one; sticky thereafter for the runtime's lifetime.
    pub fn set_controller_session_id(&self, session_id: &str) {
        let mut state = self.runtime_state.lock();
        if state.controller_session_id.is_empty() {
            state.controller_session_id = session_id.to_string();
            drop(state);
            self.save_state();
        }
    }

    pub fn record_event_processed(&self) {
        let mut state = self.runtime_state.lock();
        state.events_processed += 1;
        state.last_event_at = Some(Utc::now());
        drop(state);
        self.save_state();
    }

    /// `Pause` then `Pause` fails (AlreadyPaused); otherwise idempotent
    /// per-call semantics are handled by the caller (L2).
    pub fn pause(&self) -> Result<(), &'static str> {
        {
            let mut state = self.runtime_state.lock();
            if state.state == RunState::Paused {
                return Err("already paused");
            }
            state.state = RunState::Paused;
            state.paused_at = Some(Utc::now());
        }
        self.save_state();
        self.broadcaster
            .broadcast(&Notification::new("thread/paused", json!({"at": Utc::now()})));
        Ok(())
    }

    /// Idempotent: resuming an already-running runtime still succeeds.
    pub fn resume(&self) {
        {
            let mut state = self.runtime_state.lock();
            state.state = RunState::Running;
            state.resumed_at = Some(Utc::now());
        }
        self.save_state();
        self.broadcaster.broadcast(&Notification::new(
            "thread/resumed",
            json!({"at": Utc::now()}),
        ));
    }

    pub fn start_thread(
        &self,
        extended_context: Option<serde_json::Value>,
    ) -> (String, String, chrono::DateTime<Utc>) {
        if self.runtime_state.lock().state == RunState::Paused {
            self.resume();
        }
        let thread_id = format!("thread-{}", Uuid::new_v4());
        let session_id = self.controller_session_id();
        let started_at = Utc::now();
        let _ = extended_context;
        self.broadcaster.broadcast(&Notification::new(
            "thread/started",
            json!({"thread_id": thread_id, "session_id": session_id, "started_at": started_at}),
        ));
        (thread_id, session_id, started_at)
    }

    /// Create an `ActiveTurn`, emit `turn/started` + one `item/created`
    /// per user input message, invoke the dispatcher, and schedule the
    /// idle auto-complete timer.
    pub async fn start_turn(
        self: &Arc<Self>,
        thread_id: String,
        input: Vec<ValidatedMessage>,
    ) -> Result<ActiveTurn, JsonRpcError> {
        let turn_id = format!("turn-{}", Uuid::new_v4());
        let generation = self.generation_counter.fetch_add(1, Ordering::SeqCst);
        let turn = ActiveTurn {
            id: turn_id.clone(),
            thread_id: thread_id.clone(),
            started_at: Utc::now(),
            generation,
        };

        self.active_turns.lock().insert(
            turn_id.clone(),
            TurnEntry {
                turn: turn.clone(),
            },
        );

        self.broadcaster.broadcast(&Notification::new(
            "turn/started",
            json!({"turn_id": turn_id, "thread_id": thread_id, "started_at": turn.started_at}),
        ));
        for msg in &input {
            self.emit_item_created(&turn_id, &msg.role, &msg.texts.join("\n"));
        }

        if let Err(e) = self.dispatcher.dispatch(&turn_id, &thread_id, &input).await {
            self.active_turns.lock().remove(&turn_id);
            self.broadcaster.broadcast(&Notification::new(
                "turn/interrupted",
                json!({"turn_id": turn_id, "thread_id": thread_id, "reason": e.clone()}),
            ));
            return Err(JsonRpcError::new(INTERNAL_ERROR, e));
        }

        self.schedule_auto_complete(turn_id.clone(), generation);
        Ok(turn)
    }

    /// Append input to an active turn, re-invoke the dispatcher, and
    /// reschedule the auto-complete timer under a bumped generation.
    pub async fn steer_turn(
        self: &Arc<Self>,
        turn_id: &str,
        input: Vec<ValidatedMessage>,
    ) -> Result<(ActiveTurn, usize), JsonRpcError> {
        let (thread_id, generation) = {
            let mut turns = self.active_turns.lock();
            let entry = turns
                .get_mut(turn_id)
                .ok_or_else(|| JsonRpcError::invalid_params("turn_id", "no such active turn"))?;
            let generation = self.generation_counter.fetch_add(1, Ordering::SeqCst);
            entry.turn.generation = generation;
            (entry.turn.thread_id.clone(), generation)
        };

        let mut accepted = 0usize;
        for msg in &input {
            self.emit_item_created(turn_id, &msg.role, &msg.texts.join("\n"));
            accepted += 1;
        }

        self.dispatcher
            .dispatch(turn_id, &thread_id, &input)
            .await
            .map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e))?;

        self.schedule_auto_complete(turn_id.to_string(), generation);

        let turn = self
            .active_turns
            .lock()
            .get(turn_id)
            .map(|e| e.turn.clone())
            .ok_or_else(|| JsonRpcError::invalid_params("turn_id", "no such active turn"))?;
        Ok((turn, accepted))
    }

    /// Without `turn_id`, pauses the whole runtime. With `turn_id`,
    /// removes and interrupts that one turn. Either way, returns the
    /// `{turn_id, interrupted_at, message}` triple the RPC result is
    /// built from (§4.F.1).
    pub fn interrupt(
        &self,
        turn_id: Option<&str>,
        reason: Option<&str>,
    ) -> Result<InterruptOutcome, JsonRpcError> {
        match turn_id {
            None => {
                let _ = self.pause();
                Ok(InterruptOutcome {
                    turn_id: None,
                    interrupted_at: Utc::now(),
                    message: reason.unwrap_or("runtime paused").to_string(),
                })
            }
            Some(id) => {
                let removed = self.active_turns.lock().remove(id);
                if removed.is_none() {
                    return Err(JsonRpcError::invalid_params("turn_id", "no such active turn"));
                }
                let interrupted_at = Utc::now();
                let message = reason.unwrap_or("interrupted by client").to_string();
                self.broadcaster.broadcast(&Notification::new(
                    "turn/interrupted",
                    json!({"turn_id": id, "reason": message, "interrupted_at": interrupted_at}),
                ));
                Ok(InterruptOutcome {
                    turn_id: Some(id.to_string()),
                    interrupted_at,
                    message,
                })
            }
        }
    }

    /// Handle an ack from the controller driver. Acks for unknown turns
    /// are ignored. `running` is a progress ping — it does not finalize
    /// the turn.
    pub fn handle_turn_ack(&self, turn_id: &str, status: holon_domain::AckStatus, message: Option<&str>) {
        use holon_domain::AckStatus;
        match status {
            AckStatus::Running => {
                if self.active_turns.lock().contains_key(turn_id) {
                    self.broadcaster.broadcast(&Notification::new(
                        "turn/progress",
                        json!({"turn_id": turn_id, "message": message}),
                    ));
                }
                return;
            }
            AckStatus::Completed => {
                let removed = self.active_turns.lock().remove(turn_id);
                if removed.is_none() {
                    return;
                }
                if let Some(text) = message {
                    self.emit_item_created(turn_id, "assistant", text);
                }
                self.broadcaster.broadcast(&Notification::new(
                    "turn/completed",
                    json!({"turn_id": turn_id, "completed_at": Utc::now()}),
                ));
            }
            AckStatus::Failed => {
                let removed = self.active_turns.lock().remove(turn_id);
                if removed.is_none() {
                    return;
                }
                self.broadcaster.broadcast(&Notification::new(
                    "turn/interrupted",
                    json!({"turn_id": turn_id, "reason": message, "interrupted_at": Utc::now()}),
                ));
            }
        }
        self.record_event_processed();
    }

    fn emit_item_created(&self, turn_id: &str, role: &str, text: &str) {
        self.broadcaster.broadcast(&Notification::new(
            "item/created",
            json!({"turn_id": turn_id, "role": role, "text": text}),
        ));
    }

    /// Fires only if no reschedule has happened since (generation match);
    /// emits `turn/completed` and removes the turn — at most once per
    /// turn id (I4).
    fn schedule_auto_complete(self: &Arc<Self>, turn_id: String, generation: u64) {
        let runtime = self.clone();
        let ttl = self.turn_idle_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let should_complete = {
                let turns = runtime.active_turns.lock();
                matches!(turns.get(&turn_id), Some(entry) if entry.turn.generation == generation)
            };
            if !should_complete {
                return;
            }
            let removed = runtime.active_turns.lock().remove(&turn_id);
            if removed.is_some() {
                runtime.broadcaster.broadcast(&Notification::new(
                    "turn/completed",
                    json!({"turn_id": turn_id, "completed_at": Utc::now(), "reason": "idle_ttl"}),
                ));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as O};

    struct CountingDispatcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TurnDispatcher for CountingDispatcher {
        async fn dispatch(
            &self,
            _turn_id: &str,
            _thread_id: &str,
            _input: &[ValidatedMessage],
        ) -> Result<(), String> {
            self.calls.fetch_add(1, O::SeqCst);
            Ok(())
        }
    }

    fn msg(text: &str) -> ValidatedMessage {
        ValidatedMessage {
            role: "user".into(),
            texts: vec![text.to_string()],
        }
    }

    #[tokio::test]
    async fn pause_twice_fails_second_time_resume_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let broadcaster = Arc::new(Broadcaster::new());
        let dispatcher = Arc::new(CountingDispatcher {
            calls: AtomicUsize::new(0),
        });
        let rt = Runtime::new(
            dir.path().join("runtime-state.json"),
            Duration::from_secs(600),
            broadcaster,
            dispatcher,
        );
        rt.pause().unwrap();
        assert!(rt.pause().is_err());
        rt.resume();
        rt.resume(); // idempotent
        assert_eq!(rt.status().state, RunState::Running);
    }

    #[tokio::test]
    async fn turn_lifecycle_start_then_ack_completes() {
        let dir = tempfile::tempdir().unwrap();
        let broadcaster = Arc::new(Broadcaster::new());
        let mut sub = broadcaster.subscribe();
        let dispatcher = Arc::new(CountingDispatcher {
            calls: AtomicUsize::new(0),
        });
        let rt = Runtime::new(
            dir.path().join("runtime-state.json"),
            Duration::from_secs(600),
            broadcaster,
            dispatcher,
        );

        let turn = rt
            .start_turn("thread-1".into(), vec![msg("hello")])
            .await
            .unwrap();

        let started = sub.rx.recv().await.unwrap();
        assert!(started.contains("turn/started"));
        let item = sub.rx.recv().await.unwrap();
        assert!(item.contains("item/created"));

        rt.handle_turn_ack(&turn.id, holon_domain::AckStatus::Completed, Some("done"));
        let item2 = sub.rx.recv().await.unwrap();
        assert!(item2.contains("assistant"));
        let completed = sub.rx.recv().await.unwrap();
        assert!(completed.contains("turn/completed"));
    }

    #[tokio::test]
    async fn ack_for_unknown_turn_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let broadcaster = Arc::new(Broadcaster::new());
        let mut sub = broadcaster.subscribe();
        let dispatcher = Arc::new(CountingDispatcher {
            calls: AtomicUsize::new(0),
        });
        let rt = Runtime::new(
            dir.path().join("runtime-state.json"),
            Duration::from_secs(600),
            broadcaster,
            dispatcher,
        );
        rt.handle_turn_ack("no-such-turn", holon_domain::AckStatus::Completed, None);
        assert!(sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn auto_complete_fires_once_after_rapid_reschedule() {
        let dir = tempfile::tempdir().unwrap();
        let broadcaster = Arc::new(Broadcaster::new());
        let mut sub = broadcaster.subscribe();
        let dispatcher = Arc::new(CountingDispatcher {
            calls: AtomicUsize::new(0),
        });
        let rt = Runtime::new(
            dir.path().join("runtime-state.json"),
            Duration::from_millis(40),
            broadcaster,
            dispatcher,
        );

        let turn = rt
            .start_turn("thread-1".into(), vec![msg("hello")])
            .await
            .unwrap();
        // Reschedule twice in rapid succession.
        rt.steer_turn(&turn.id, vec![msg("more")]).await.unwrap();
        rt.steer_turn(&turn.id, vec![msg("even more")]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut completed_count = 0;
        while let Ok(line) = sub.rx.try_recv() {
            if line.contains("turn/completed") {
                completed_count += 1;
            }
        }
        assert_eq!(completed_count, 1);
    }
}
