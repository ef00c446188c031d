//! Deduplication key derivation (§4.3).
//!
//! A pure function of `(type, subject, payload.{delivery_id, label.name,
//! comment.id, review.id})` — no I/O, no state.

use holon_domain::{EventEnvelope, Subject};
use serde_json::Value;

/// Extract a GitHub delivery id, direct (`x_github_delivery`) or nested
/// under a nginx-style `headers` object (`headers["x-github-delivery"]`).
pub fn delivery_id(raw: &Value) -> Option<String> {
    if let Some(v) = raw.get("x_github_delivery").and_then(Value::as_str) {
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }
    raw.get("headers")
        .and_then(|h| h.get("x-github-delivery"))
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

/// Compute the dedupe key for an already-extracted `(source, repo, type,
/// subject, action, payload)` tuple, per the rules in §4.3.
pub fn compute_dedupe_key(
    source: &str,
    repo: &str,
    kind: &str,
    subject: &Subject,
    action: Option<&str>,
    payload: &Value,
) -> String {
    if let Some(id) = delivery_id(payload) {
        return format!("github:delivery:{id}");
    }

    if kind.ends_with(".labeled") || kind.ends_with(".unlabeled") {
        let label = payload
            .get("label")
            .and_then(|l| l.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();
        let action = action.unwrap_or("");
        return format!(
            "github:{repo}:{}:{}:label:{action}:{label}",
            subject.kind, subject.id
        );
    }

    if let Some(comment_id) = payload.get("comment").and_then(|c| c.get("id")) {
        let action = action.unwrap_or("");
        return format!(
            "github:{repo}:comment:{comment_id}:{kind}:{action}"
        );
    }

    if let Some(review_id) = payload.get("review").and_then(|r| r.get("id")) {
        let action = action.unwrap_or("");
        return format!("github:{repo}:review:{review_id}:{kind}:{action}");
    }

    format!("{source}:{repo}:{}:{}:{kind}", subject.kind, subject.id)
}

/// Recompute the dedupe key for an already-built envelope, using its own
/// fields as the pure-function inputs (used by the canonical-envelope path
/// of the normalizer, and by round-trip tests).
pub fn dedupe_key_for_envelope(env: &EventEnvelope, action: Option<&str>) -> String {
    compute_dedupe_key(
        &env.source,
        env.repo(),
        &env.kind,
        &env.subject,
        action,
        &env.payload,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_id_wins_over_label_rule() {
        let payload = serde_json::json!({
            "x_github_delivery": "d-1",
            "label": {"name": "Bug"},
        });
        let subject = Subject {
            kind: "issue".into(),
            id: "1".into(),
        };
        let key = compute_dedupe_key("github", "org/repo", "github.issue.labeled", &subject, Some("labeled"), &payload);
        assert_eq!(key, "github:delivery:d-1");
    }

    #[test]
    fn label_key_distinguishes_issue_and_pull_request_subject_kind() {
        let payload = serde_json::json!({"label": {"name": "Bug"}});
        let issue_subject = Subject {
            kind: "issue".into(),
            id: "579".into(),
        };
        let pr_subject = Subject {
            kind: "pull_request".into(),
            id: "579".into(),
        };
        let k1 = compute_dedupe_key(
            "github",
            "org/repo",
            "github.issue.labeled",
            &issue_subject,
            Some("labeled"),
            &payload,
        );
        let k2 = compute_dedupe_key(
            "github",
            "org/repo",
            "github.pull_request.labeled",
            &pr_subject,
            Some("labeled"),
            &payload,
        );
        assert_ne!(k1, k2);
    }

    #[test]
    fn default_rule_has_no_delivery_id_or_comment_or_review() {
        let payload = serde_json::json!({});
        let subject = Subject {
            kind: "pull_request".into(),
            id: "42".into(),
        };
        let key = compute_dedupe_key(
            "github",
            "org/repo",
            "github.pull_request.opened",
            &subject,
            Some("opened"),
            &payload,
        );
        assert_eq!(key, "github:org/repo:pull_request:42:github.pull_request.opened");
    }
}
