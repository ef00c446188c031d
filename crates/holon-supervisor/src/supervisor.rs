//! The subscription supervisor (component G): owns the lifecycle of
//! whichever transport (E1/E2) the current config calls for, reconciles
//! on hot reload, and publishes `subscription-status.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use holon_audit::write_json_atomic;
use holon_domain::config::Config;
use holon_events::EventService;
use holon_normalize::normalize;
use holon_transport::{Forwarder, ForwarderConfig, GithubHookLister, WebsocketSource};
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::status::SubscriptionStatus;
use crate::transport::{derive_desired, ActiveTransport, DesiredTransport};

const RAW_CHANNEL_DEPTH: usize = 256;

/// Everything the supervisor needs across a reconcile: the app's shared
/// RPC state (for the ingest channel and runtime), the event pipeline,
/// and enough config to rebuild a forwarder or websocket source.
pub struct Supervisor {
    config_path: PathBuf,
    state_dir: PathBuf,
    status_path: PathBuf,
    server_port: u16,
    forwarder_helper_path: String,
    event_service: Arc<EventService>,
    /// Serializes start/stop/reconcile transitions (§5's `reconcile_mu`).
    active: Mutex<ActiveTransport>,
    /// Finer-grained than `active`: readers of `/health`-adjacent status
    /// never block on an in-flight reconcile.
    status: RwLock<SubscriptionStatus>,
    /// The transport `active` was last brought up to match; the health
    /// watcher replays this to restart a dead forwarder without needing
    /// to reparse the config file.
    current_desired: RwLock<DesiredTransport>,
    last_restart: Mutex<Option<std::time::Instant>>,
}

impl Supervisor {
    pub async fn new(
        config_path: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
        server_port: u16,
        forwarder_helper_path: impl Into<String>,
        event_service: Arc<EventService>,
    ) -> holon_domain::Result<Arc<Self>> {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir)?;
        let status_path = state_dir.join("subscription-status.json");
        let initial_status = SubscriptionStatus::rpc_only("no_subscriptions");
        let sup = Arc::new(Self {
            config_path: config_path.into(),
            state_dir,
            status_path,
            server_port,
            forwarder_helper_path: forwarder_helper_path.into(),
            event_service,
            active: Mutex::new(ActiveTransport::RpcOnly),
            status: RwLock::new(initial_status),
            current_desired: RwLock::new(DesiredTransport::RpcOnly {
                reason: "no_subscriptions",
            }),
            last_restart: Mutex::new(None),
        });
        Ok(sup)
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status.read().clone()
    }

    fn load_config(&self) -> holon_domain::Result<Config> {
        let raw = std::fs::read_to_string(&self.config_path)?;
        Config::load_yaml(&raw)
    }

    /// Read the config once at boot and bring the transport up to match.
    pub async fn start(self: &Arc<Self>) {
        match self.load_config() {
            Ok(config) => self.reconcile(&config).await,
            Err(e) => {
                tracing::error!(error = %e, "failed to load initial config; starting rpc_only");
                self.publish_status(SubscriptionStatus {
                    last_reload_error: Some(e.to_string()),
                    ..SubscriptionStatus::rpc_only("config_load_failed")
                });
            }
        }
    }

    /// Called by the config watcher on every debounced change, and once
    /// at startup. Never panics on a malformed config (I5) — it logs and
    /// leaves whatever transport was already running in place.
    pub async fn reconcile(self: &Arc<Self>, config: &Config) {
        let desired = match derive_desired(config) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "invalid transport config on reload; keeping current transport");
                let mut status = self.status.read().clone();
                status.last_reload_error = Some(e);
                self.publish_status(status);
                return;
            }
        };

        let mut active = self.active.lock().await;
        if desired_matches(&active, &desired) {
            return;
        }

        let old = std::mem::replace(&mut *active, ActiveTransport::RpcOnly);
        old.stop().await;

        let new_active = match self.bring_up(&desired).await {
            Ok(a) => a,
            Err(e) => {
                tracing::error!(error = %e, "failed to start desired transport; falling back to rpc_only");
                let mut status = SubscriptionStatus::rpc_only("start_failed");
                status.last_reload_error = Some(e);
                self.publish_status(status);
                *active = ActiveTransport::RpcOnly;
                return;
            }
        };
        *active = new_active;
        *self.current_desired.write() = desired.clone();

        let status = self.status_for(&desired);
        self.publish_status(status);
    }

    /// Forwarder health poll (§4.G): if the active transport is a
    /// forwarder and it fails its health check, restart it — but only if
    /// the restart cooldown has elapsed, so a persistently crashing
    /// helper doesn't spin.
    pub async fn check_forwarder_health(self: &Arc<Self>, restart_cooldown: Duration) {
        let needs_restart = {
            let active = self.active.lock().await;
            matches!(&*active, ActiveTransport::Forwarder { forwarder, .. } if forwarder.health_check().is_err())
        };
        if !needs_restart {
            return;
        }

        {
            let mut last = self.last_restart.lock();
            if let Some(at) = *last {
                if at.elapsed() < restart_cooldown {
                    return;
                }
            }
            *last = Some(std::time::Instant::now());
        }

        tracing::warn!("forwarder failed health check; restarting");
        let desired = self.current_desired.read().clone();
        let mut active = self.active.lock().await;
        let old = std::mem::replace(&mut *active, ActiveTransport::RpcOnly);
        old.stop().await;
        match self.bring_up(&desired).await {
            Ok(new_active) => {
                *active = new_active;
                self.publish_status(self.status_for(&desired));
            }
            Err(e) => {
                tracing::error!(error = %e, "forwarder restart failed; falling back to rpc_only");
                let mut status = SubscriptionStatus::rpc_only("restart_failed");
                status.last_reload_error = Some(e);
                self.publish_status(status);
            }
        }
    }

    async fn bring_up(&self, desired: &DesiredTransport) -> Result<ActiveTransport, String> {
        match desired {
            DesiredTransport::RpcOnly { .. } => Ok(ActiveTransport::RpcOnly),
            DesiredTransport::GhForward { repos } => {
                let target_url = format!("http://127.0.0.1:{}/ingress/github/webhook", self.server_port);
                let forwarder = Arc::new(
                    Forwarder::new(ForwarderConfig {
                        port: self.server_port,
                        repos: repos.clone(),
                        target_url,
                        helper_path: self.forwarder_helper_path.clone(),
                    })
                    .map_err(|e| e.to_string())?
                    .with_hook_lister(Arc::new(GithubHookLister::default())),
                );

                let (raw_tx, raw_rx) = mpsc::channel::<serde_json::Value>(RAW_CHANNEL_DEPTH);
                let consumer = spawn_line_consumer(raw_rx, self.event_service.clone());

                // The forwarder hands us raw JSON text lines on stdout; a
                // relay task parses each and feeds the shared raw channel.
                let (line_tx, mut line_rx) = mpsc::channel::<String>(RAW_CHANNEL_DEPTH);
                let relay = tokio::spawn(async move {
                    while let Some(line) = line_rx.recv().await {
                        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) {
                            if raw_tx.send(value).await.is_err() {
                                break;
                            }
                        }
                    }
                });

                let start_forwarder = forwarder.clone();
                let start_task = tokio::spawn(async move {
                    if let Err(e) = start_forwarder.start(line_tx).await {
                        tracing::error!(error = %e, "forwarder failed to start");
                    }
                });

                Ok(ActiveTransport::Forwarder {
                    forwarder,
                    tasks: vec![start_task, relay, consumer],
                })
            }
            DesiredTransport::Websocket { url, .. } => {
                let source = Arc::new(WebsocketSource::new(url.clone()));
                let cancel = CancellationToken::new();
                let (raw_tx, raw_rx) = mpsc::channel::<serde_json::Value>(RAW_CHANNEL_DEPTH);
                let consumer = spawn_line_consumer(raw_rx, self.event_service.clone());

                let run_source = source.clone();
                let run_cancel = cancel.clone();
                let run_task = tokio::spawn(async move {
                    run_source.run(run_cancel, raw_tx).await;
                });

                Ok(ActiveTransport::Websocket {
                    source,
                    cancel,
                    tasks: vec![run_task, consumer],
                })
            }
        }
    }

    fn status_for(&self, desired: &DesiredTransport) -> SubscriptionStatus {
        match desired {
            DesiredTransport::RpcOnly { reason } => SubscriptionStatus::rpc_only(reason),
            DesiredTransport::GhForward { .. } => SubscriptionStatus {
                mode: "gh_forward".to_string(),
                rpc_active: true,
                ingress_active: true,
                reason: String::new(),
                forwarder: Some(crate::status::ForwarderStatusBlock {
                    running: true,
                    last_error: None,
                }),
                websocket: None,
                last_reload_error: None,
                updated_at: chrono::Utc::now(),
            },
            DesiredTransport::Websocket { .. } => SubscriptionStatus {
                mode: "websocket".to_string(),
                rpc_active: true,
                ingress_active: true,
                reason: String::new(),
                forwarder: None,
                websocket: None,
                last_reload_error: None,
                updated_at: chrono::Utc::now(),
            },
        }
    }

    fn publish_status(&self, status: SubscriptionStatus) {
        *self.status.write() = status.clone();
        if let Err(e) = write_json_atomic(&self.status_path, &status) {
            tracing::warn!(error = %e, "failed to persist subscription-status.json");
        }
    }

    pub async fn stop(self: &Arc<Self>) {
        let mut active = self.active.lock().await;
        let old = std::mem::replace(&mut *active, ActiveTransport::RpcOnly);
        old.stop().await;
    }

    pub fn state_dir(&self) -> &std::path::Path {
        &self.state_dir
    }

    /// Drains the HTTP ingress route's bounded channel (the receiving end
    /// of `AppState::ingest_tx`) through the same normalize+process path
    /// the forwarder/websocket transports use.
    pub fn spawn_ingress_consumer(&self, ingest_rx: mpsc::Receiver<serde_json::Value>) -> JoinHandle<()> {
        spawn_line_consumer(ingest_rx, self.event_service.clone())
    }

    /// Wires the hot-reload file watcher to this supervisor's `reconcile`.
    /// The watcher's callback runs on a plain OS thread (see
    /// [`crate::watcher::spawn_config_watcher`]), so each reload is
    /// bounced onto the current Tokio runtime via its `Handle`.
    pub fn watch_and_reconcile(
        self: &Arc<Self>,
        poll_interval: Duration,
        debounce: Duration,
    ) -> notify::Result<notify::PollWatcher> {
        let handle = tokio::runtime::Handle::current();
        let sup = self.clone();
        crate::watcher::spawn_config_watcher(
            self.config_path.clone(),
            poll_interval,
            debounce,
            move |config| {
                let sup = sup.clone();
                handle.spawn(async move { sup.reconcile(&config).await });
            },
        )
    }
}

fn desired_matches(active: &ActiveTransport, desired: &DesiredTransport) -> bool {
    matches!(
        (active, desired),
        (ActiveTransport::RpcOnly, DesiredTransport::RpcOnly { .. })
            | (ActiveTransport::Forwarder { .. }, DesiredTransport::GhForward { .. })
            | (ActiveTransport::Websocket { .. }, DesiredTransport::Websocket { .. })
    )
}

/// Drains raw JSON values from a transport, normalizes, and feeds the
/// event service — the one place E1/E2 output rejoins the pipeline the
/// HTTP ingress route also feeds.
fn spawn_line_consumer(
    mut raw_rx: mpsc::Receiver<serde_json::Value>,
    event_service: Arc<EventService>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(value) = raw_rx.recv().await {
            let envelope = match normalize(&value, None) {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(error = %e, "dropping unnormalizable event");
                    continue;
                }
            };
            if let Err(e) = event_service.process(envelope).await {
                tracing::warn!(error = %e, "event service failed to process envelope");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use holon_events::{EventHandler, HandlerError};
    use async_trait::async_trait;

    struct NoopHandler;
    #[async_trait]
    impl EventHandler for NoopHandler {
        async fn handle_event(&self, _e: &holon_domain::EventEnvelope) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn rpc_only_config_yields_rpc_only_status_after_start() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("agent-config.yaml"), "server:\n  port: 8080\n").unwrap();
        let event_service = Arc::new(
            EventService::new(dir.path(), Arc::new(NoopHandler)).unwrap(),
        );
        let sup = Supervisor::new(
            dir.path().join("agent-config.yaml"),
            dir.path().join("state"),
            8080,
            "gh-webhook-forward",
            event_service,
        )
        .await
        .unwrap();
        sup.start().await;
        assert_eq!(sup.status().mode, "rpc_only");
        assert!(dir.path().join("state/subscription-status.json").exists());
    }
}
