use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::{Deserialize, Serialize};

/// One UI step in a plan. The kind-specific payload lives in [`ActionKind`];
/// the JSON form is flat: `{"type":"click","selector":"#go","description":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub kind: ActionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionKind {
    Click {
        selector: String,
        #[serde(
            default,
            deserialize_with = "optional_whole",
            skip_serializing_if = "Option::is_none"
        )]
        delay: Option<u64>,
    },
    Type {
        selector: String,
        value: String,
        #[serde(
            default,
            deserialize_with = "optional_whole",
            skip_serializing_if = "Option::is_none"
        )]
        delay: Option<u64>,
    },
    Select {
        selector: String,
        value: String,
    },
    Navigate {
        url: String,
        #[serde(
            rename = "waitUntil",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        wait_until: Option<WaitUntil>,
    },
    Wait {
        #[serde(deserialize_with = "whole")]
        duration: u64,
    },
    Scroll {
        direction: ScrollDirection,
        #[serde(
            default,
            deserialize_with = "optional_whole",
            skip_serializing_if = "Option::is_none"
        )]
        amount: Option<i64>,
    },
    Screenshot {
        #[serde(rename = "fullPage", default, skip_serializing_if = "Option::is_none")]
        full_page: Option<bool>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Load,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

/// Model output often writes counts as `1000.0`; accept any float with no
/// fractional part and reject the rest.
struct WholeNumberVisitor;

impl<'de> Visitor<'de> for WholeNumberVisitor {
    type Value = i128;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a whole number")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<i128, E> {
        Ok(v.into())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<i128, E> {
        Ok(v.into())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<i128, E> {
        if v.is_finite() && v.fract() == 0.0 {
            Ok(v as i128)
        } else {
            Err(E::invalid_value(Unexpected::Float(v), &self))
        }
    }
}

struct Whole<T>(T);

impl<'de, T: TryFrom<i128>> Deserialize<'de> for Whole<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let n = deserializer.deserialize_any(WholeNumberVisitor)?;
        T::try_from(n)
            .map(Whole)
            .map_err(|_| de::Error::custom(format!("{n} is out of range")))
    }
}

fn whole<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i128>,
{
    Whole::deserialize(deserializer).map(|Whole(n)| n)
}

fn optional_whole<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i128>,
{
    Option::<Whole<T>>::deserialize(deserializer).map(|n| n.map(|Whole(n)| n))
}

impl AutomationAction {
    pub fn new(kind: ActionKind, description: impl Into<String>) -> Self {
        Self {
            id: None,
            description: description.into(),
            kind,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Discriminator as it appears on the wire.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ActionKind::Click { .. } => "click",
            ActionKind::Type { .. } => "type",
            ActionKind::Select { .. } => "select",
            ActionKind::Navigate { .. } => "navigate",
            ActionKind::Wait { .. } => "wait",
            ActionKind::Scroll { .. } => "scroll",
            ActionKind::Screenshot { .. } => "screenshot",
        }
    }
}

/// Outcome of one attempted action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionExecutionResult {
    pub action: AutomationAction,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Base64 PNG, only set for `screenshot` actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl ActionExecutionResult {
    pub fn succeeded(action: AutomationAction, duration_ms: u64) -> Self {
        Self {
            action,
            success: true,
            error: None,
            duration_ms,
            screenshot: None,
        }
    }

    pub fn failed(action: AutomationAction, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            action,
            success: false,
            error: Some(error.into()),
            duration_ms,
            screenshot: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Button,
    Input,
    Link,
    Text,
    Form,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiElement {
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

/// What perception saw on the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenAnalysis {
    pub page_description: String,
    pub elements: Vec<UiElement>,
    pub interactive_element_count: usize,
}

impl ScreenAnalysis {
    /// Placeholder returned whenever perception fails.
    pub fn degraded() -> Self {
        Self {
            page_description: "Unable to analyze screen".to_string(),
            elements: Vec::new(),
            interactive_element_count: 0,
        }
    }
}

/// Bookkeeping for one browsing context + page pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationSession {
    pub session_id: String,
    pub url: String,
    pub actions: Vec<AutomationAction>,
    pub results: Vec<ActionExecutionResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutomationSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            url: "about:blank".to_string(),
            actions: Vec::new(),
            results: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRequest {
    #[serde(default)]
    pub url: Option<String>,
    pub task: String,
    /// Base64-encoded image of the current page.
    pub screenshot: String,
    #[serde(default)]
    pub dom_snapshot: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionSummary {
    pub completed: Vec<ActionExecutionResult>,
    pub failed: Vec<ActionExecutionResult>,
}

impl ExecutionSummary {
    pub fn from_results(results: Vec<ActionExecutionResult>) -> Self {
        let (completed, failed) = results.into_iter().partition(|r| r.success);
        Self { completed, failed }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationResponse {
    pub success: bool,
    pub session_id: String,
    pub actions: Vec<AutomationAction>,
    pub execution: ExecutionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl AutomationResponse {
    pub fn rejected(session_id: String, actions: Vec<AutomationAction>, error: String) -> Self {
        Self {
            success: false,
            session_id,
            actions,
            execution: ExecutionSummary::default(),
            screenshot: None,
            error: Some(error),
            warnings: Vec::new(),
        }
    }
}

pub const DEFAULT_SESSION_ID: &str = "default";

/// Map key for a caller-supplied session id: trimmed, with blank or missing
/// ids falling back to [`DEFAULT_SESSION_ID`].
pub fn session_key(session_id: Option<&str>) -> &str {
    session_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(DEFAULT_SESSION_ID)
}
pub const MAX_ACTIONS: usize = 50;
pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 60_000;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_flat_action_json() {
        let action: AutomationAction = serde_json::from_value(json!({
            "type": "navigate",
            "url": "https://example.com",
            "waitUntil": "networkidle",
            "description": "Open the site"
        }))
        .unwrap();

        assert_eq!(action.id, None);
        assert_eq!(
            action.kind,
            ActionKind::Navigate {
                url: "https://example.com".into(),
                wait_until: Some(WaitUntil::NetworkIdle),
            }
        );
    }

    #[test]
    fn serializes_with_discriminator_and_camel_case_fields() {
        let action = AutomationAction::new(ActionKind::Screenshot { full_page: Some(true) }, "Capture")
            .with_id("action-1");
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "screenshot");
        assert_eq!(value["fullPage"], true);
        assert_eq!(value["id"], "action-1");
    }

    #[test]
    fn rejects_unknown_action_type() {
        let parsed = serde_json::from_value::<AutomationAction>(json!({
            "type": "hover",
            "selector": "#menu",
            "description": "Hover"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn summary_partitions_by_success() {
        let ok = ActionExecutionResult::succeeded(
            AutomationAction::new(ActionKind::Wait { duration: 10 }, "wait"),
            10,
        );
        let bad = ActionExecutionResult::failed(
            AutomationAction::new(ActionKind::Wait { duration: 10 }, "wait"),
            "boom",
            1,
        );
        let summary = ExecutionSummary::from_results(vec![ok, bad.clone(), bad]);
        assert_eq!(summary.completed.len(), 1);
        assert_eq!(summary.failed.len(), 2);
    }

    #[test]
    fn whole_number_floats_are_accepted_for_counts() {
        let wait: AutomationAction =
            serde_json::from_str(r#"{"type":"wait","duration":1000.0,"description":"w"}"#).unwrap();
        assert_eq!(wait.kind, ActionKind::Wait { duration: 1000 });

        let scroll: AutomationAction = serde_json::from_value(json!({
            "type": "scroll", "direction": "up", "amount": -250.0, "description": "s"
        }))
        .unwrap();
        assert_eq!(
            scroll.kind,
            ActionKind::Scroll { direction: ScrollDirection::Up, amount: Some(-250) }
        );

        let click: AutomationAction = serde_json::from_value(json!({
            "type": "click", "selector": "#go", "delay": 50.0, "description": "c"
        }))
        .unwrap();
        assert_eq!(click.kind, ActionKind::Click { selector: "#go".into(), delay: Some(50) });

        let no_delay: AutomationAction = serde_json::from_value(json!({
            "type": "click", "selector": "#go", "delay": null, "description": "c"
        }))
        .unwrap();
        assert_eq!(no_delay.kind, ActionKind::Click { selector: "#go".into(), delay: None });
    }

    #[test]
    fn fractional_or_negative_durations_are_rejected() {
        for duration in [json!(1000.5), json!(-1), json!(-1.0), json!("1000")] {
            let parsed = serde_json::from_value::<AutomationAction>(json!({
                "type": "wait", "duration": duration, "description": "w"
            }));
            assert!(parsed.is_err(), "{duration} should be rejected");
        }
    }

    #[test]
    fn session_keys_are_trimmed_and_default_when_blank() {
        assert_eq!(session_key(None), DEFAULT_SESSION_ID);
        assert_eq!(session_key(Some("")), DEFAULT_SESSION_ID);
        assert_eq!(session_key(Some("   ")), DEFAULT_SESSION_ID);
        assert_eq!(session_key(Some(" checkout ")), "checkout");
        assert_eq!(session_key(Some("checkout")), "checkout");
    }
}
