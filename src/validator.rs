//! Structural and safety checks on a proposed plan.
//!
//! Rules run on the JSON form so that caller-supplied plans with unknown
//! kinds or missing fields are reported instead of failing deserialization.

use serde::Serialize;
use serde_json::Value;

use crate::types::AutomationAction;

const KNOWN_TYPES: [&str; 7] = [
    "click",
    "type",
    "select",
    "navigate",
    "wait",
    "scroll",
    "screenshot",
];
const PASSWORD_MARKERS: [&str; 2] = ["password", "passwd"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// `max_actions` is the configured plan limit, normally
/// [`MAX_ACTIONS`](crate::types::MAX_ACTIONS).
pub fn validate_actions(actions: &[AutomationAction], max_actions: usize) -> ValidationResult {
    let values: Vec<Value> = actions
        .iter()
        .map(|action| serde_json::to_value(action).unwrap_or(Value::Null))
        .collect();
    validate_raw_actions(&values, max_actions)
}

/// Collects every violation; never stops at the first one.
pub fn validate_raw_actions(actions: &[Value], max_actions: usize) -> ValidationResult {
    let mut errors = Vec::new();

    if actions.is_empty() {
        errors.push("No actions provided".to_string());
    }
    if actions.len() > max_actions {
        errors.push(format!(
            "Too many actions: {} (maximum {max_actions})",
            actions.len()
        ));
    }

    for (index, action) in actions.iter().enumerate() {
        check_action(index, action, &mut errors);
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}

fn non_blank_str<'a>(action: &'a Value, field: &str) -> Option<&'a str> {
    action
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Typed text is taken verbatim, so whitespace counts as a value.
fn non_empty_str<'a>(action: &'a Value, field: &str) -> Option<&'a str> {
    action
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

pub fn is_password_selector(selector: &str) -> bool {
    let lowered = selector.to_lowercase();
    PASSWORD_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn check_action(index: usize, action: &Value, errors: &mut Vec<String>) {
    let n = index + 1;
    let kind = action.get("type").and_then(Value::as_str);
    let Some(kind) = kind.filter(|k| KNOWN_TYPES.contains(k)) else {
        errors.push(format!(
            "Action {n}: unknown action type {}",
            kind.map_or_else(|| "(missing)".to_string(), |k| format!("'{k}'"))
        ));
        return;
    };

    let mut require = |field: &str| {
        let present = match field {
            "value" => non_empty_str(action, field),
            _ => non_blank_str(action, field),
        };
        if present.is_none() {
            errors.push(format!("Action {n}: {kind} requires a {field}"));
        }
    };

    match kind {
        "click" => require("selector"),
        "type" | "select" => {
            require("selector");
            require("value");
        }
        "navigate" => require("url"),
        _ => {}
    }

    if kind == "type" {
        if let Some(selector) = non_blank_str(action, "selector") {
            if is_password_selector(selector) {
                errors.push(format!(
                    "Action {n}: typing into password fields is not allowed ({selector})"
                ));
            }
        }
    }
}
