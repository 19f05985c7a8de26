use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{MessageType, ValidatedMessage};

pub const DEFAULT_MAX_TITLE_LEN: usize = 200;
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 1000;

/// Length ceilings applied to the required text fields, counted in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_title_len: usize,
    pub max_message_len: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_title_len: DEFAULT_MAX_TITLE_LEN,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: &'static str,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Every violation found in a payload; never empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("payload failed validation ({} violation(s))", violations.len())]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn fields(&self) -> Vec<&'static str> {
        self.violations.iter().map(|v| v.field).collect()
    }
}

/// Checks the parsed webhook body and produces the normalized message.
pub fn validate(
    parsed: &Value,
    limits: &ValidationLimits,
) -> Result<ValidatedMessage, ValidationError> {
    let Some(object) = parsed.as_object() else {
        return Err(ValidationError {
            violations: vec![Violation {
                field: "body",
                reason: "must be a JSON object".to_string(),
            }],
        });
    };

    let mut violations = Vec::new();

    let title = required_text(object, "title", limits.max_title_len, &mut violations);
    let message = required_text(object, "message", limits.max_message_len, &mut violations);

    let message_type = object
        .get("type")
        .and_then(Value::as_str)
        .map(MessageType::from_label)
        .unwrap_or_default();

    let metadata = match object.get("metadata") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            violations.push(Violation {
                field: "metadata",
                reason: "must be a JSON object".to_string(),
            });
            Map::new()
        }
    };

    let reported_at = optional_text(object, "timestamp", &mut violations);
    let source = optional_text(object, "source", &mut violations);

    if !violations.is_empty() {
        return Err(ValidationError { violations });
    }

    Ok(ValidatedMessage {
        message_type,
        title: title.unwrap_or_default(),
        message: message.unwrap_or_default(),
        metadata,
        source,
        reported_at,
    })
}

fn required_text(
    object: &Map<String, Value>,
    field: &'static str,
    max_len: usize,
    violations: &mut Vec<Violation>,
) -> Option<String> {
    let reason = match object.get(field) {
        None | Some(Value::Null) => "is required".to_string(),
        Some(Value::String(text)) if text.trim().is_empty() => "must not be blank".to_string(),
        Some(Value::String(text)) => {
            let len = text.chars().count();
            if len > max_len {
                format!("must be at most {max_len} characters (got {len})")
            } else {
                return Some(text.clone());
            }
        }
        Some(_) => "must be a string".to_string(),
    };
    violations.push(Violation { field, reason });
    None
}

fn optional_text(
    object: &Map<String, Value>,
    field: &'static str,
    violations: &mut Vec<Violation>,
) -> Option<String> {
    match object.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(_) => {
            violations.push(Violation {
                field,
                reason: "must be a string".to_string(),
            });
            None
        }
    }
}
