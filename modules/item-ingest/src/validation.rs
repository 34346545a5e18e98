//! Field validation for decoded item events
//!
//! Validation is rejecting but never fatal: a failed event is nacked with no
//! store mutation, and the error lists every missing or invalid field so one
//! log line shows the full diagnosis.

use crate::models::{Category, ItemEvent};
use chrono::DateTime;
use serde_json::Value;

pub const NAME_MAX_LEN: usize = 100;
pub const DESCRIPTION_MAX_LEN: usize = 500;

/// One failed validation rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid item event: {}", summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

fn optional_str<'a>(
    payload: &'a Value,
    field: &'static str,
    violations: &mut Vec<Violation>,
) -> Option<&'a str> {
    match payload.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(_) => {
            violations.push(Violation {
                field,
                message: "must be a string".to_string(),
            });
            None
        }
    }
}

/// Validate a decoded event payload against the item contract
///
/// Required: `id` (non-empty), `name` (1–100 chars), `category` (one of the
/// fixed enum). Bounded/format-checked when present: `description` (≤500
/// chars), `timestamp` (RFC 3339). All violations are collected before
/// returning.
pub fn validate_item(payload: &Value) -> Result<ItemEvent, ValidationError> {
    let mut violations = Vec::new();

    let id = match optional_str(payload, "id", &mut violations) {
        Some(s) if !s.trim().is_empty() => Some(s.to_string()),
        Some(_) => {
            violations.push(Violation {
                field: "id",
                message: "must be non-empty".to_string(),
            });
            None
        }
        None if payload.get("id").is_none() || payload.get("id") == Some(&Value::Null) => {
            violations.push(Violation {
                field: "id",
                message: "is required".to_string(),
            });
            None
        }
        None => None,
    };

    let name = match optional_str(payload, "name", &mut violations) {
        Some(s) => {
            let len = s.chars().count();
            if len == 0 || len > NAME_MAX_LEN {
                violations.push(Violation {
                    field: "name",
                    message: format!("must be between 1 and {} characters", NAME_MAX_LEN),
                });
                None
            } else {
                Some(s.to_string())
            }
        }
        None if payload.get("name").is_none() || payload.get("name") == Some(&Value::Null) => {
            violations.push(Violation {
                field: "name",
                message: "is required".to_string(),
            });
            None
        }
        None => None,
    };

    let category = match optional_str(payload, "category", &mut violations) {
        Some(s) => match Category::parse(s) {
            Some(category) => Some(category),
            None => {
                violations.push(Violation {
                    field: "category",
                    message: "must be one of: treats, food, supplements, toys".to_string(),
                });
                None
            }
        },
        None if payload.get("category").is_none()
            || payload.get("category") == Some(&Value::Null) =>
        {
            violations.push(Violation {
                field: "category",
                message: "is required".to_string(),
            });
            None
        }
        None => None,
    };

    let description = optional_str(payload, "description", &mut violations).map(str::to_string);
    if let Some(d) = description.as_deref() {
        if d.chars().count() > DESCRIPTION_MAX_LEN {
            violations.push(Violation {
                field: "description",
                message: format!("must be at most {} characters", DESCRIPTION_MAX_LEN),
            });
        }
    }

    let timestamp = optional_str(payload, "timestamp", &mut violations).map(str::to_string);
    if let Some(ts) = timestamp.as_deref() {
        if DateTime::parse_from_rfc3339(ts).is_err() {
            violations.push(Violation {
                field: "timestamp",
                message: "must be an ISO 8601 timestamp".to_string(),
            });
        }
    }

    let source = optional_str(payload, "source", &mut violations).map(str::to_string);
    let request_id = optional_str(payload, "requestId", &mut violations).map(str::to_string);

    if !violations.is_empty() {
        return Err(ValidationError { violations });
    }

    // All three unwraps are guarded by the violation checks above
    Ok(ItemEvent {
        id: id.expect("id validated"),
        name: name.expect("name validated"),
        category: category.expect("category validated"),
        description,
        timestamp,
        source,
        request_id,
    })
}
