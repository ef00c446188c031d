mod controller;
mod github;
mod server;

pub use controller::*;
pub use github::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level configuration for `holon-serve`, loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(flatten)]
    pub subscriptions: SubscriptionsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    pub fn load_yaml(raw: &str) -> crate::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Validate the configuration, returning every issue found (never
    /// short-circuits on the first error — mirrors `sa_domain::config::Config::validate`).
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be in (0, 65535]".into(),
            });
        }

        if let Some(gh) = self.subscriptions.github() {
            for (i, repo) in gh.repos.iter().enumerate() {
                if !is_valid_repo(repo) {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Error,
                        field: format!("subscriptions[0].github.repos[{i}]"),
                        message: format!("\"{repo}\" is not in owner/name form"),
                    });
                }
            }

            match gh.transport.mode.as_str() {
                "" | "gh_forward" | "auto" => {}
                "websocket" => {
                    if gh
                        .transport
                        .websocket_url
                        .as_deref()
                        .unwrap_or("")
                        .is_empty()
                    {
                        issues.push(ConfigIssue {
                            severity: ConfigSeverity::Error,
                            field: "subscriptions[0].github.transport.websocket_url".into(),
                            message: "websocket mode requires a non-empty websocket_url".into(),
                        });
                    }
                }
                other => {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Error,
                        field: "subscriptions[0].github.transport.mode".into(),
                        message: format!("unknown transport mode \"{other}\""),
                    });
                }
            }
        } else {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "subscriptions".into(),
                message: "no github subscription configured; supervisor will run rpc_only".into(),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_transport_mode() {
        let yaml = r#"
subscriptions:
  - github:
      repos: ["org/repo"]
      transport:
        mode: carrier_pigeon
"#;
        let cfg = Config::load_yaml(yaml).unwrap();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field.ends_with("mode")));
    }

    #[test]
    fn empty_subscriptions_is_a_warning_not_an_error() {
        let cfg = Config::default();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .all(|i| i.severity != ConfigSeverity::Error));
    }
}
