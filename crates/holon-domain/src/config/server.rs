use serde::{Deserialize, Serialize};

fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_port() -> u16 {
    8080
}
fn d_max_body_size() -> usize {
    10 * 1024 * 1024
}
fn d_channel_depth() -> usize {
    100
}
fn d_channel_insert_timeout_ms() -> u64 {
    2_000
}
fn d_turn_idle_ttl_seconds() -> u64 {
    600
}

/// HTTP surface tunables — `webhook_port`, ingress body/channel limits —
/// plus the turn-runtime's idle auto-complete TTL, since both live in the
/// `holon-serve` process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_max_body_size")]
    pub max_body_size: usize,
    #[serde(default = "d_channel_depth")]
    pub channel_depth: usize,
    #[serde(default = "d_channel_insert_timeout_ms")]
    pub channel_insert_timeout_ms: u64,
    #[serde(default = "d_turn_idle_ttl_seconds")]
    pub turn_idle_ttl_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            max_body_size: d_max_body_size(),
            channel_depth: d_channel_depth(),
            channel_insert_timeout_ms: d_channel_insert_timeout_ms(),
            turn_idle_ttl_seconds: d_turn_idle_ttl_seconds(),
        }
    }
}
