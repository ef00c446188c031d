//! Wire shapes for the token-exchange collaborator (§6.5): a short-lived
//! platform access token service the core calls out to but does not
//! implement. Kept here as typed contracts for any future caller — this
//! crate exposes no server for this surface.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenExchangeRequest {
    pub repo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenExchangeResponse {
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub permissions: Vec<String>,
}

/// `code` values like `policy.replay.detected`, `policy.actor.forbidden`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenExchangeError {
    pub code: String,
    pub message: String,
}
