use serde::{Deserialize, Serialize};

fn d_heartbeat() -> u64 {
    60
}
fn d_idle_timeout() -> u64 {
    5400
}
fn d_total_timeout() -> u64 {
    10_800
}
fn d_query_timeout() -> u64 {
    300
}
fn d_session_id() -> String {
    "main".into()
}

/// Tunables for the controller session driver (component H), sourced from
/// the environment per §6.4 of the spec this crate implements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub event_channel_path: String,
    pub event_cursor_path: String,
    #[serde(default)]
    pub ack_channel_path: Option<String>,
    pub session_state_path: String,
    #[serde(default = "d_heartbeat")]
    pub heartbeat_seconds: u64,
    #[serde(default = "d_idle_timeout")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "d_total_timeout")]
    pub total_timeout_seconds: u64,
    #[serde(default = "d_query_timeout")]
    pub query_timeout_seconds: u64,
    #[serde(default)]
    pub resume_session_id: Option<String>,
    #[serde(default = "d_session_id")]
    pub default_session_id: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            event_channel_path: "event-channel.ndjson".into(),
            event_cursor_path: "event-channel.cursor".into(),
            ack_channel_path: None,
            session_state_path: "session-state.json".into(),
            heartbeat_seconds: d_heartbeat(),
            idle_timeout_seconds: d_idle_timeout(),
            total_timeout_seconds: d_total_timeout(),
            query_timeout_seconds: d_query_timeout(),
            resume_session_id: None,
            default_session_id: d_session_id(),
        }
    }
}

impl ControllerConfig {
    /// Load tunables from environment variables, falling back to defaults.
    /// Mirrors the `cli/config.rs` `SA_CONFIG` load pattern, narrowed to
    /// `env::var` lookups since this process has no YAML config of its own.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            event_channel_path: std::env::var("EVENT_CHANNEL_PATH")
                .unwrap_or(d.event_channel_path),
            event_cursor_path: std::env::var("EVENT_CURSOR_PATH").unwrap_or(d.event_cursor_path),
            ack_channel_path: std::env::var("ACK_CHANNEL_PATH").ok(),
            session_state_path: std::env::var("SESSION_STATE_PATH")
                .unwrap_or(d.session_state_path),
            heartbeat_seconds: env_u64("HEARTBEAT_SECONDS", d.heartbeat_seconds),
            idle_timeout_seconds: env_u64("IDLE_TIMEOUT_SECONDS", d.idle_timeout_seconds),
            total_timeout_seconds: env_u64("TOTAL_TIMEOUT_SECONDS", d.total_timeout_seconds),
            query_timeout_seconds: env_u64("QUERY_TIMEOUT_SECONDS", d.query_timeout_seconds),
            resume_session_id: std::env::var("RESUME_SESSION_ID").ok(),
            default_session_id: std::env::var("DEFAULT_SESSION_ID")
                .unwrap_or(d.default_session_id),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn d_reload_poll_secs() -> u64 {
    3
}
fn d_reload_debounce_ms() -> u64 {
    600
}
fn d_forwarder_restart_cooldown_secs() -> u64 {
    10
}
fn d_processed_max() -> usize {
    2000
}

/// Tunables for the subscription supervisor (component G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub config_path: String,
    pub state_dir: String,
    #[serde(default = "d_reload_poll_secs")]
    pub reload_poll_interval_secs: u64,
    #[serde(default = "d_reload_debounce_ms")]
    pub reload_debounce_ms: u64,
    #[serde(default = "d_forwarder_restart_cooldown_secs")]
    pub forwarder_restart_cooldown_secs: u64,
    #[serde(default = "d_processed_max")]
    pub processed_max: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            config_path: "agent-config.yaml".into(),
            state_dir: "state".into(),
            reload_poll_interval_secs: d_reload_poll_secs(),
            reload_debounce_ms: d_reload_debounce_ms(),
            forwarder_restart_cooldown_secs: d_forwarder_restart_cooldown_secs(),
            processed_max: d_processed_max(),
        }
    }
}
