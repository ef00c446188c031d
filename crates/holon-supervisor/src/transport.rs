//! Desired-transport derivation (§4.G) and the handle owning whichever
//! transport is currently active.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use holon_domain::config::Config;
use holon_transport::{Forwarder, WebsocketSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredTransport {
    /// No github subscription, or an empty `repos` list.
    RpcOnly { reason: &'static str },
    GhForward { repos: Vec<String> },
    Websocket { repos: Vec<String>, url: String },
}

/// Unknown transport mode is a hard configuration error (caller decides
/// whether that's fatal at startup or merely `last_reload_error` on a
/// hot reload).
pub fn derive_desired(config: &Config) -> Result<DesiredTransport, String> {
    let Some(gh) = config.subscriptions.github() else {
        return Ok(DesiredTransport::RpcOnly {
            reason: "no_subscriptions",
        });
    };
    if gh.repos.is_empty() {
        return Ok(DesiredTransport::RpcOnly {
            reason: "empty_repos",
        });
    }

    match gh.transport.mode.as_str() {
        "" | "gh_forward" | "auto" => Ok(DesiredTransport::GhForward {
            repos: gh.repos.clone(),
        }),
        "websocket" => {
            let url = gh.transport.websocket_url.clone().unwrap_or_default();
            if url.is_empty() {
                return Err("websocket mode requires a non-empty websocket_url".to_string());
            }
            Ok(DesiredTransport::Websocket {
                repos: gh.repos.clone(),
                url,
            })
        }
        other => Err(format!("unknown transport mode \"{other}\"")),
    }
}

/// The concrete transport realized from a [`DesiredTransport`], owning
/// whatever background tasks feed raw JSON into the ingest pipeline.
pub enum ActiveTransport {
    RpcOnly,
    Forwarder {
        forwarder: std::sync::Arc<Forwarder>,
        tasks: Vec<JoinHandle<()>>,
    },
    Websocket {
        source: std::sync::Arc<WebsocketSource>,
        cancel: CancellationToken,
        tasks: Vec<JoinHandle<()>>,
    },
}

impl ActiveTransport {
    pub fn desired(&self) -> DesiredTransport {
        match self {
            ActiveTransport::RpcOnly => DesiredTransport::RpcOnly {
                reason: "rpc_only",
            },
            ActiveTransport::Forwarder { .. } => DesiredTransport::GhForward { repos: vec![] },
            ActiveTransport::Websocket { .. } => DesiredTransport::Websocket {
                repos: vec![],
                url: String::new(),
            },
        }
    }

    pub async fn stop(self) {
        match self {
            ActiveTransport::RpcOnly => {}
            ActiveTransport::Forwarder { forwarder, tasks } => {
                let _ = forwarder.stop().await;
                for t in tasks {
                    t.abort();
                }
            }
            ActiveTransport::Websocket {
                cancel, tasks, ..
            } => {
                cancel.cancel();
                for t in tasks {
                    t.abort();
                }
            }
        }
    }
}

/// A raw-event sink the ingest pipeline's producers write onto — either
/// the forwarder's stdout echo or the websocket reader's merged payload.
pub type RawSender = mpsc::Sender<serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;
    use holon_domain::config::Config as DomainConfig;

    #[test]
    fn no_subscriptions_is_rpc_only() {
        let cfg = DomainConfig::default();
        assert_eq!(
            derive_desired(&cfg).unwrap(),
            DesiredTransport::RpcOnly {
                reason: "no_subscriptions"
            }
        );
    }

    #[test]
    fn empty_repos_is_rpc_only() {
        let yaml = r#"
subscriptions:
  - github:
      repos: []
"#;
        let cfg = DomainConfig::load_yaml(yaml).unwrap();
        assert_eq!(
            derive_desired(&cfg).unwrap(),
            DesiredTransport::RpcOnly { reason: "empty_repos" }
        );
    }

    #[test]
    fn websocket_mode_requires_url() {
        let yaml = r#"
subscriptions:
  - github:
      repos: ["org/repo"]
      transport:
        mode: websocket
"#;
        let cfg = DomainConfig::load_yaml(yaml).unwrap();
        assert!(derive_desired(&cfg).is_err());
    }

    #[test]
    fn blank_mode_defaults_to_gh_forward() {
        let yaml = r#"
subscriptions:
  - github:
      repos: ["org/repo"]
"#;
        let cfg = DomainConfig::load_yaml(yaml).unwrap();
        assert_eq!(
            derive_desired(&cfg).unwrap(),
            DesiredTransport::GhForward {
                repos: vec!["org/repo".to_string()]
            }
        );
    }
}
