//! Websocket source (component E2).

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const READ_DEADLINE: Duration = Duration::from_secs(1);
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WebsocketStatus {
    pub connected: bool,
    pub last_error: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Dials `url`, reconnecting with jittered exponential backoff
/// (500ms → 5s) on failure. Each complete JSON message is forwarded to
/// `out` after header-merge normalization.
pub struct WebsocketSource {
    url: String,
    status: RwLock<WebsocketStatus>,
}

impl WebsocketSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: RwLock::new(WebsocketStatus::default()),
        }
    }

    pub fn status(&self) -> WebsocketStatus {
        self.status.read().clone()
    }

    pub async fn run(&self, cancel: CancellationToken, out: mpsc::Sender<serde_json::Value>) {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let dial = tokio::time::timeout(
                HANDSHAKE_TIMEOUT,
                tokio_tungstenite::connect_async(&self.url),
            )
            .await;

            let ws = match dial {
                Ok(Ok((ws, _resp))) => ws,
                Ok(Err(e)) => {
                    self.record_error(e.to_string());
                    self.backoff_and_wait(&cancel, &mut attempt).await;
                    continue;
                }
                Err(_) => {
                    self.record_error("handshake timed out".into());
                    self.backoff_and_wait(&cancel, &mut attempt).await;
                    continue;
                }
            };

            attempt = 0;
            {
                let mut s = self.status.write();
                s.connected = true;
                s.last_error = None;
            }

            let (mut write, mut read) = ws.split();
            loop {
                if cancel.is_cancelled() {
                    let _ = write.close().await;
                    return;
                }
                match tokio::time::timeout(READ_DEADLINE, read.next()).await {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        self.status.write().last_message_at = Some(Utc::now());
                        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                            let merged = merge_headers_into_payload(value);
                            if out.send(merged).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                        self.status.write().connected = false;
                        break;
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => {
                        self.record_error(e.to_string());
                        break;
                    }
                    Err(_) => {
                        // Read deadline elapsed; loop and try again.
                        continue;
                    }
                }
            }
        }
    }

    fn record_error(&self, error: String) {
        let mut s = self.status.write();
        s.connected = false;
        s.last_error = Some(error);
    }

    async fn backoff_and_wait(&self, cancel: &CancellationToken, attempt: &mut u32) {
        let delay = delay_for_attempt(*attempt);
        *attempt += 1;
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {}
        }
    }
}

fn delay_for_attempt(attempt: u32) -> Duration {
    let base_ms = INITIAL_BACKOFF.as_millis() as f64;
    let delay_ms = base_ms * 2f64.powi(attempt as i32);
    Duration::from_millis(delay_ms.min(MAX_BACKOFF.as_millis() as f64) as u64)
}

/// Some upstream servers wrap the webhook body as `{headers, payload}`.
/// Merge header fields not already present in the payload, transforming
/// `Header-Key` → `header_key`.
pub fn merge_headers_into_payload(value: serde_json::Value) -> serde_json::Value {
    let serde_json::Value::Object(mut obj) = value else {
        return value;
    };
    let (Some(headers), Some(payload)) = (obj.remove("headers"), obj.get("payload").cloned())
    else {
        return serde_json::Value::Object(obj);
    };
    let serde_json::Value::Object(headers) = headers else {
        return payload;
    };
    let serde_json::Value::Object(mut payload) = payload else {
        return serde_json::Value::Object(obj);
    };
    for (k, v) in headers {
        let key = k.to_lowercase().replace('-', "_");
        payload.entry(key).or_insert(v);
    }
    serde_json::Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_grows_then_caps() {
        let d0 = delay_for_attempt(0);
        let d1 = delay_for_attempt(1);
        let d_big = delay_for_attempt(20);
        assert_eq!(d0, Duration::from_millis(500));
        assert!(d1 > d0);
        assert_eq!(d_big, MAX_BACKOFF);
    }

    #[test]
    fn merges_headers_without_overwriting_existing_payload_keys() {
        let wrapped = json!({
            "headers": {"X-GitHub-Event": "issues", "X-GitHub-Delivery": "d-1"},
            "payload": {"action": "opened", "x_github_event": "already_set"},
        });
        let merged = merge_headers_into_payload(wrapped);
        assert_eq!(merged["x_github_event"], "already_set");
        assert_eq!(merged["x_github_delivery"], "d-1");
    }

    #[test]
    fn passthrough_when_not_wrapped() {
        let plain = json!({"event": "issues"});
        let merged = merge_headers_into_payload(plain.clone());
        assert_eq!(merged, plain);
    }
}
