//! Turn input validation (§4.F.2's "Validation rules for turn input").

use serde::Deserialize;

use crate::jsonrpc::JsonRpcError;

#[derive(Debug, Clone, Deserialize)]
pub struct InputContentPart {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputMessage {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Vec<InputContentPart>,
}

/// A message that has passed validation: `type` defaulted to `"message"`,
/// every content part is a non-empty, trimmed text blob.
#[derive(Debug, Clone)]
pub struct ValidatedMessage {
    pub role: String,
    pub texts: Vec<String>,
}

/// Validate raw turn input. At least one message is required; each
/// message defaults `type` to `"message"` (any other value is rejected);
/// each content part must be `input_text` or `text` with non-empty
/// trimmed text. Violations are reported with the offending field path.
pub fn validate_input(input: &[InputMessage]) -> Result<Vec<ValidatedMessage>, JsonRpcError> {
    if input.is_empty() {
        return Err(JsonRpcError::invalid_params(
            "input",
            "at least one message is required",
        ));
    }

    let mut out = Vec::with_capacity(input.len());
    for (i, msg) in input.iter().enumerate() {
        let kind = msg.kind.as_deref().unwrap_or("message");
        if kind != "message" {
            return Err(JsonRpcError::invalid_params(
                &format!("input[{i}].type"),
                &format!("expected \"message\", got \"{kind}\""),
            ));
        }
        if msg.content.is_empty() {
            return Err(JsonRpcError::invalid_params(
                &format!("input[{i}].content"),
                "at least one content part is required",
            ));
        }
        let mut texts = Vec::with_capacity(msg.content.len());
        for (j, part) in msg.content.iter().enumerate() {
            let part_kind = part.kind.as_deref().unwrap_or("");
            if part_kind != "input_text" && part_kind != "text" {
                return Err(JsonRpcError::invalid_params(
                    &format!("input[{i}].content[{j}].type"),
                    &format!("expected \"input_text\" or \"text\", got \"{part_kind}\""),
                ));
            }
            let trimmed = part.text.as_deref().unwrap_or("").trim();
            if trimmed.is_empty() {
                return Err(JsonRpcError::invalid_params(
                    &format!("input[{i}].content[{j}].text"),
                    "text must not be empty",
                ));
            }
            texts.push(trimmed.to_string());
        }
        out.push(ValidatedMessage {
            role: if msg.role.is_empty() {
                "user".to_string()
            } else {
                msg.role.clone()
            },
            texts,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_input() {
        assert!(validate_input(&[]).is_err());
    }

    #[test]
    fn rejects_blank_text() {
        let input = vec![InputMessage {
            kind: None,
            role: "user".into(),
            content: vec![InputContentPart {
                kind: Some("input_text".into()),
                text: Some("   ".into()),
            }],
        }];
        let err = validate_input(&input).unwrap_err();
        assert_eq!(err.code, crate::jsonrpc::INVALID_PARAMS);
    }

    #[test]
    fn accepts_defaulted_message_type_and_text_kind() {
        let input = vec![InputMessage {
            kind: None,
            role: "user".into(),
            content: vec![InputContentPart {
                kind: Some("text".into()),
                text: Some(" hello ".into()),
            }],
        }];
        let validated = validate_input(&input).unwrap();
        assert_eq!(validated[0].texts[0], "hello");
    }
}
