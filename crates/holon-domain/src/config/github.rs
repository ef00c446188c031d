use serde::{Deserialize, Serialize};

/// `subscriptions: [ { github: { repos, transport } }, … ]` — the only
/// subscription kind this core understands today.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubscriptionsConfig {
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    pub github: GithubSubscription,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GithubSubscription {
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransportConfig {
    /// `gh_forward` | `websocket` | `auto` | `""` (empty defaults to `gh_forward`).
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub websocket_url: Option<String>,
    /// Target URL the forwarder helper delivers webhooks to.
    #[serde(default)]
    pub forward_url: Option<String>,
}

impl SubscriptionsConfig {
    /// The first (and, today, only) configured GitHub subscription, if any.
    pub fn github(&self) -> Option<&GithubSubscription> {
        self.subscriptions.first().map(|s| &s.github)
    }

    pub fn load_yaml(raw: &str) -> crate::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }
}

/// Repo strings must be in `owner/name` form.
pub fn is_valid_repo(repo: &str) -> bool {
    let parts: Vec<&str> = repo.splitn(2, '/').collect();
    parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_yaml() {
        let yaml = r#"
subscriptions:
  - github:
      repos: ["org/repo"]
      transport:
        mode: websocket
        websocket_url: "wss://example.com/ws"
"#;
        let cfg = SubscriptionsConfig::load_yaml(yaml).unwrap();
        let gh = cfg.github().unwrap();
        assert_eq!(gh.repos, vec!["org/repo".to_string()]);
        assert_eq!(gh.transport.mode, "websocket");
    }

    #[test]
    fn repo_validation() {
        assert!(is_valid_repo("org/repo"));
        assert!(!is_valid_repo("org"));
        assert!(!is_valid_repo("/repo"));
        assert!(!is_valid_repo("org/"));
    }
}
