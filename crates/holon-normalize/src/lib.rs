//! Platform-specific JSON → canonical [`EventEnvelope`] (component C).

mod dedupe;

pub use dedupe::{compute_dedupe_key, dedupe_key_for_envelope, delivery_id};

use chrono::Utc;
use holon_domain::{next_id, EventEnvelope, Result, Scope, Subject};
use serde_json::Value;

/// Accept a raw JSON line and a "repo hint" (the repo context the ingress
/// endpoint already knows, if any) and produce a canonical envelope.
pub fn normalize(raw: &Value, repo_hint: Option<&str>) -> Result<EventEnvelope> {
    if let Some(kind) = raw.get("type").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        return Ok(canonical_from_value(raw, kind, repo_hint));
    }
    github_webhook(raw, repo_hint)
}

/// Strategy-1 path: the payload already looks like a canonical envelope.
/// Fill in whatever is missing and recompute `dedupe_key` if absent.
fn canonical_from_value(raw: &Value, kind: &str, repo_hint: Option<&str>) -> EventEnvelope {
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| next_id("evt"));

    let source = raw
        .get("source")
        .and_then(Value::as_str)
        .unwrap_or("github")
        .to_string();

    let at = raw
        .get("at")
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let repo = raw
        .get("scope")
        .and_then(|s| s.get("repo"))
        .and_then(Value::as_str)
        .or_else(|| raw.get("repo").and_then(Value::as_str))
        .map(str::to_string)
        .or_else(|| repo_hint.map(str::to_string));

    let subject = raw
        .get("subject")
        .and_then(|s| serde_json::from_value::<Subject>(s.clone()).ok())
        .unwrap_or_default();

    let payload = raw.get("payload").cloned().unwrap_or_else(|| raw.clone());

    let dedupe_key = raw
        .get("dedupe_key")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            compute_dedupe_key(
                &source,
                repo.as_deref().unwrap_or(""),
                kind,
                &subject,
                raw.get("action").and_then(Value::as_str),
                &payload,
            )
        });

    EventEnvelope {
        id,
        source,
        kind: kind.to_string(),
        at,
        scope: Scope {
            tenant: None,
            repo,
        },
        subject,
        dedupe_key,
        payload,
    }
}

/// Strategy-2 path: a raw GitHub webhook body.
fn github_webhook(raw: &Value, repo_hint: Option<&str>) -> Result<EventEnvelope> {
    let event_name = raw
        .get("event")
        .and_then(Value::as_str)
        .or_else(|| raw.get("x_github_event").and_then(Value::as_str))
        .or_else(|| {
            raw.get("headers")
                .and_then(|h| h.get("x-github-event"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
        .ok_or_else(|| holon_domain::Error::UnsupportedEvent("missing event name".into()))?;

    let action = raw.get("action").and_then(Value::as_str).map(str::to_string);

    let repo = raw
        .get("repository")
        .and_then(|r| r.get("full_name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| repo_hint.map(str::to_string))
        .unwrap_or_default();

    let (subject, kind) = match event_name.as_str() {
        "issues" => {
            let number = raw
                .get("issue")
                .and_then(|i| i.get("number"))
                .map(value_as_id_string)
                .unwrap_or_default();
            let is_pr = raw
                .get("issue")
                .and_then(|i| i.get("pull_request"))
                .is_some();
            let kind_name = if is_pr { "pull_request" } else { "issue" };
            let action = action.clone().ok_or_else(missing_action)?;
            (
                Subject {
                    kind: kind_name.into(),
                    id: number,
                },
                format!("github.{kind_name}.{action}"),
            )
        }
        "issue_comment" => {
            let number = raw
                .get("issue")
                .and_then(|i| i.get("number"))
                .map(value_as_id_string)
                .unwrap_or_default();
            let is_pr = raw
                .get("issue")
                .and_then(|i| i.get("pull_request"))
                .is_some();
            let kind_name = if is_pr { "pull_request" } else { "issue" };
            let action = action.clone().ok_or_else(missing_action)?;
            if !matches!(action.as_str(), "created" | "edited" | "deleted") {
                return Err(unsupported(&event_name, &action));
            }
            (
                Subject {
                    kind: kind_name.into(),
                    id: number,
                },
                format!("github.{kind_name}.comment.{action}"),
            )
        }
        "pull_request" => {
            let number = raw
                .get("pull_request")
                .and_then(|p| p.get("number"))
                .map(value_as_id_string)
                .unwrap_or_default();
            let action = action.clone().ok_or_else(missing_action)?;
            (
                Subject {
                    kind: "pull_request".into(),
                    id: number,
                },
                format!("github.pull_request.{action}"),
            )
        }
        "pull_request_review_comment" => {
            let number = raw
                .get("pull_request")
                .and_then(|p| p.get("number"))
                .map(value_as_id_string)
                .unwrap_or_default();
            let action = action.clone().ok_or_else(missing_action)?;
            if !matches!(action.as_str(), "created" | "edited" | "deleted") {
                return Err(unsupported(&event_name, &action));
            }
            (
                Subject {
                    kind: "pull_request".into(),
                    id: number,
                },
                format!("github.pull_request_review_comment.{action}"),
            )
        }
        "pull_request_review" => {
            let number = raw
                .get("pull_request")
                .and_then(|p| p.get("number"))
                .map(value_as_id_string)
                .unwrap_or_default();
            let action = action.clone().ok_or_else(missing_action)?;
            if !matches!(action.as_str(), "submitted" | "edited" | "dismissed") {
                return Err(unsupported(&event_name, &action));
            }
            (
                Subject {
                    kind: "pull_request".into(),
                    id: number,
                },
                format!("github.pull_request_review.{action}"),
            )
        }
        "check_suite" => {
            let action = action.clone().unwrap_or_default();
            if action != "completed" {
                return Err(unsupported(&event_name, &action));
            }
            let number = raw
                .get("check_suite")
                .and_then(|c| c.get("pull_requests"))
                .and_then(Value::as_array)
                .and_then(|arr| arr.first())
                .and_then(|pr| pr.get("number"))
                .map(value_as_id_string)
                .unwrap_or_default();
            (
                Subject {
                    kind: "pull_request".into(),
                    id: number,
                },
                "github.check_suite.completed".to_string(),
            )
        }
        other => {
            return Err(holon_domain::Error::UnsupportedEvent(format!(
                "unsupported event \"{other}\""
            )))
        }
    };

    let dedupe_key = compute_dedupe_key(
        "github",
        &repo,
        &kind,
        &subject,
        action.as_deref(),
        raw,
    );

    Ok(EventEnvelope {
        id: next_id("evt"),
        source: "github".to_string(),
        kind,
        at: Utc::now(),
        scope: Scope {
            tenant: None,
            repo: Some(repo),
        },
        subject,
        dedupe_key,
        payload: raw.clone(),
    })
}

fn value_as_id_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn missing_action() -> holon_domain::Error {
    holon_domain::Error::UnsupportedEvent("missing action".into())
}

fn unsupported(event: &str, action: &str) -> holon_domain::Error {
    holon_domain::Error::UnsupportedEvent(format!("{event}.{action} is not supported"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn issue_labeled_maps_to_issue_subject() {
        let raw = json!({
            "event": "issues",
            "action": "labeled",
            "repository": {"full_name": "org/repo"},
            "issue": {"number": 579},
            "label": {"name": "bug"},
        });
        let env = normalize(&raw, None).unwrap();
        assert_eq!(env.kind, "github.issue.labeled");
        assert_eq!(env.subject.kind, "issue");
        assert_eq!(env.subject.id, "579");
    }

    #[test]
    fn issue_with_pull_request_link_maps_to_pull_request_subject() {
        let raw = json!({
            "event": "issues",
            "action": "labeled",
            "repository": {"full_name": "org/repo"},
            "issue": {"number": 579, "pull_request": {"url": "..."}},
            "label": {"name": "bug"},
        });
        let env = normalize(&raw, None).unwrap();
        assert_eq!(env.subject.kind, "pull_request");
    }

    #[test]
    fn label_echo_across_issues_and_pull_request_yields_distinct_dedupe_keys() {
        let issues_raw = json!({
            "event": "issues",
            "action": "labeled",
            "repository": {"full_name": "org/repo"},
            "issue": {"number": 579, "pull_request": {"url": "..."}},
            "label": {"name": "bug"},
        });
        let pr_raw = json!({
            "event": "pull_request",
            "action": "labeled",
            "repository": {"full_name": "org/repo"},
            "pull_request": {"number": 579},
            "label": {"name": "bug"},
        });
        let e1 = normalize(&issues_raw, None).unwrap();
        let e2 = normalize(&pr_raw, None).unwrap();
        assert_ne!(e1.dedupe_key, e2.dedupe_key);
    }

    #[test]
    fn delivery_id_drives_dedupe_key_regardless_of_event_kind() {
        let raw = json!({
            "event": "issue_comment",
            "action": "created",
            "repository": {"full_name": "org/repo"},
            "issue": {"number": 527},
            "comment": {"id": 1},
            "x_github_delivery": "d-1",
        });
        let env = normalize(&raw, None).unwrap();
        assert_eq!(env.dedupe_key, "github:delivery:d-1");
    }

    #[test]
    fn unsupported_event_is_rejected() {
        let raw = json!({"event": "star", "action": "created"});
        assert!(normalize(&raw, None).is_err());
    }

    #[test]
    fn missing_event_name_is_rejected() {
        let raw = json!({"action": "created"});
        assert!(normalize(&raw, None).is_err());
    }

    #[test]
    fn check_suite_requires_completed_action() {
        let raw = json!({
            "event": "check_suite",
            "action": "requested",
            "repository": {"full_name": "org/repo"},
            "check_suite": {"pull_requests": [{"number": 1}]},
        });
        assert!(normalize(&raw, None).is_err());
    }

    #[test]
    fn canonical_envelope_passthrough_fills_missing_fields() {
        let raw = json!({
            "type": "timer.tick",
            "source": "timer",
        });
        let env = normalize(&raw, Some("org/repo")).unwrap();
        assert!(!env.id.is_empty());
        assert_eq!(env.repo(), "org/repo");
        assert!(!env.dedupe_key.is_empty());
    }

    #[test]
    fn round_trip_normalize_then_serialize_then_normalize() {
        let raw = json!({
            "event": "pull_request",
            "action": "opened",
            "repository": {"full_name": "org/repo"},
            "pull_request": {"number": 10},
        });
        let env1 = normalize(&raw, None).unwrap();
        let serialized = serde_json::to_value(&env1).unwrap();
        let env2 = normalize(&serialized, None).unwrap();
        assert_eq!(env1.kind, env2.kind);
        assert_eq!(env1.subject, env2.subject);
        assert_eq!(env1.dedupe_key, env2.dedupe_key);
    }
}
