//! `subscription-status.json` — the atomically-written snapshot external
//! tools poll to observe the supervisor's current transport.

use serde::Serialize;

use holon_transport::WebsocketStatus;

#[derive(Debug, Clone, Serialize, Default)]
pub struct ForwarderStatusBlock {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// `rpc_only` | `gh_forward` | `websocket`.
    pub mode: String,
    pub rpc_active: bool,
    pub ingress_active: bool,
    /// `no_subscriptions` | `empty_repos` | `rpc_only` | `""`.
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarder: Option<ForwarderStatusBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket: Option<WebsocketStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reload_error: Option<String>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl SubscriptionStatus {
    pub fn rpc_only(reason: &str) -> Self {
        Self {
            mode: "rpc_only".to_string(),
            rpc_active: true,
            ingress_active: false,
            reason: reason.to_string(),
            forwarder: None,
            websocket: None,
            last_reload_error: None,
            updated_at: chrono::Utc::now(),
        }
    }
}
