use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::dom::{PLANNER_DOM_MAX_CHARS, dom_excerpt};
use crate::error::{AutomationError, Result};
use crate::json_extract::extract_json_array;
use crate::llm::{CompletionRequest, ModelClient, resolve_api_key};
use crate::perception::ScreenAnalyzer;
use crate::types::{ActionKind, AutomationAction, MAX_ACTIONS, ScreenAnalysis};

const ACTION_CONTRACT: &str = r#"Respond with ONLY a JSON array of actions. Every action has a "type" and a "description", plus:
- {"type":"click","selector":"...","delay":optional ms,"description":"..."}
- {"type":"type","selector":"...","value":"text to enter","delay":optional ms,"description":"..."}
- {"type":"select","selector":"...","value":"option value","description":"..."}
- {"type":"navigate","url":"https://...","waitUntil":optional "load"|"domcontentloaded"|"networkidle","description":"..."}
- {"type":"wait","duration":ms,"description":"..."}
- {"type":"scroll","direction":"up"|"down"|"left"|"right","amount":optional pixels,"description":"..."}
- {"type":"screenshot","fullPage":optional bool,"description":"..."}

Rules:
1. Prefer selectors reported in the screen analysis; otherwise use descriptive CSS selectors (id, name, aria-label, visible text).
2. NEVER type into password fields.
3. Do not submit forms unless the task explicitly asks for it.
4. Insert a wait after navigation and before reading dynamic content.
5. Use at most {max_actions} actions."#;

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub api_key: Option<String>,
    /// Defaults to [`MAX_ACTIONS`] when unset.
    pub max_actions: Option<usize>,
}

/// A plan plus anything the caller may want to know about how it was made.
#[derive(Debug, Clone)]
pub struct Plan {
    pub actions: Vec<AutomationAction>,
    pub analysis: ScreenAnalysis,
    pub truncated_from: Option<usize>,
    pub fallback: bool,
}

pub struct ActionPlanner {
    analyzer: ScreenAnalyzer,
    client: Arc<dyn ModelClient>,
    model: String,
    default_api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

/// Single-step plan used whenever planning fails.
pub fn fallback_plan() -> Vec<AutomationAction> {
    vec![
        AutomationAction::new(
            ActionKind::Screenshot { full_page: None },
            "Capture the current page (planning unavailable)",
        )
        .with_id("fallback-1"),
    ]
}

fn build_prompt(task: &str, analysis: &ScreenAnalysis, dom_snapshot: &str, max_actions: usize) -> Result<String> {
    let analysis_json = serde_json::to_string_pretty(analysis)?;
    let contract = ACTION_CONTRACT.replace("{max_actions}", &max_actions.to_string());
    Ok(format!(
        "You are planning browser automation steps.\n\nTask: {task}\n\n\
         Screen analysis:\n{analysis_json}\n\n\
         DOM excerpt:\n{}\n\n{contract}",
        dom_excerpt(dom_snapshot, PLANNER_DOM_MAX_CHARS)
    ))
}

/// Strict parse of the first JSON array in `raw` into actions.
pub fn parse_plan(raw: &str) -> Result<Vec<AutomationAction>> {
    let json = extract_json_array(raw)
        .ok_or_else(|| AutomationError::Parse("no JSON array in planner reply".to_string()))?;
    let actions: Vec<AutomationAction> = serde_json::from_str(json)?;
    if actions.is_empty() {
        return Err(AutomationError::Parse("planner returned no actions".to_string()));
    }
    Ok(actions)
}

/// Truncates to `max_actions` and fills in missing ids. Returns the original
/// length when truncation happened.
fn post_process(actions: &mut Vec<AutomationAction>, max_actions: usize) -> Option<usize> {
    let original = actions.len();
    let truncated = if original > max_actions {
        actions.truncate(max_actions);
        Some(original)
    } else {
        None
    };
    for (index, action) in actions.iter_mut().enumerate() {
        let missing = action.id.as_deref().is_none_or(|id| id.trim().is_empty());
        if missing {
            action.id = Some(format!("action-{}", index + 1));
        }
    }
    truncated
}

impl ActionPlanner {
    pub fn new(client: Arc<dyn ModelClient>, config: &AgentConfig) -> Self {
        Self {
            analyzer: ScreenAnalyzer::new(client.clone(), config),
            client,
            model: config.planner_model.clone(),
            default_api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.planner_max_tokens,
        }
    }

    /// Always returns at least one action; any failure yields [`fallback_plan`].
    pub async fn plan_actions(
        &self,
        task: &str,
        screenshot: &[u8],
        dom_snapshot: &str,
        options: &PlanOptions,
    ) -> Plan {
        let max_actions = options.max_actions.unwrap_or(MAX_ACTIONS).max(1);
        let analysis = self
            .analyzer
            .analyze_screen(screenshot, Some(dom_snapshot), options.api_key.as_deref())
            .await;

        match self
            .request_plan(task, &analysis, dom_snapshot, max_actions, options.api_key.as_deref())
            .await
        {
            Ok(mut actions) => {
                let truncated_from = post_process(&mut actions, max_actions);
                if let Some(original) = truncated_from {
                    warn!(target: "planner", original, max_actions, "plan truncated");
                }
                info!(target: "planner", actions = actions.len(), "plan ready");
                Plan {
                    actions,
                    analysis,
                    truncated_from,
                    fallback: false,
                }
            }
            Err(e) => {
                warn!(target: "planner", "planning failed, using fallback plan: {e}");
                Plan {
                    actions: fallback_plan(),
                    analysis,
                    truncated_from: None,
                    fallback: true,
                }
            }
        }
    }

    async fn request_plan(
        &self,
        task: &str,
        analysis: &ScreenAnalysis,
        dom_snapshot: &str,
        max_actions: usize,
        api_key: Option<&str>,
    ) -> Result<Vec<AutomationAction>> {
        let api_key = resolve_api_key(api_key, self.default_api_key.as_deref())?;
        let raw = self
            .client
            .complete(CompletionRequest {
                model: self.model.clone(),
                api_key,
                prompt: build_prompt(task, analysis, dom_snapshot, max_actions)?,
                image_base64: None,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            })
            .await?;
        parse_plan(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockModelClient;
    use serde_json::json;

    const ANALYSIS: &str = r##"{"pageDescription":"Search page","elements":[{"type":"input","description":"Search","selector":"#q"}],"interactiveElementCount":1}"##;

    fn planner(client: MockModelClient) -> ActionPlanner {
        let config = AgentConfig {
            api_key: Some("sk-test".into()),
            ..AgentConfig::default()
        };
        ActionPlanner::new(Arc::new(client), &config)
    }

    /// First call is perception (has an image), second is planning.
    fn scripted(plan_reply: impl Fn() -> Result<String> + Send + 'static) -> MockModelClient {
        let mut client = MockModelClient::new();
        client
            .expect_complete()
            .withf(|req| req.image_base64.is_some())
            .returning(|_| Ok(ANALYSIS.to_string()));
        client
            .expect_complete()
            .withf(|req| req.image_base64.is_none())
            .returning(move |_| plan_reply());
        client
    }

    #[tokio::test]
    async fn plans_and_assigns_missing_ids() {
        let client = scripted(|| {
            Ok(r##"Here is the plan:
```json
[
  {"type":"type","selector":"#q","value":"rust","description":"Enter query"},
  {"id":"submit","type":"click","selector":"#go","description":"Search"},
  {"type":"wait","duration":1000,"description":"Let results load"}
]
```"##
                .to_string())
        });

        let plan = planner(client)
            .plan_actions("search for rust", &[0], "<input id=q>", &PlanOptions::default())
            .await;

        assert!(!plan.fallback);
        assert_eq!(plan.actions.len(), 3);
        let ids: Vec<_> = plan.actions.iter().map(|a| a.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["action-1", "submit", "action-3"]);
        assert_eq!(plan.analysis.elements.len(), 1);
    }

    #[tokio::test]
    async fn prompt_carries_task_analysis_and_capped_dom() {
        let mut client = MockModelClient::new();
        client
            .expect_complete()
            .withf(|req| req.image_base64.is_some())
            .returning(|_| Ok(ANALYSIS.to_string()));
        client
            .expect_complete()
            .withf(|req| {
                req.image_base64.is_none()
                    && req.prompt.contains("Task: find the docs")
                    && req.prompt.contains("\"selector\": \"#q\"")
                    && req.prompt.contains("Use at most 7 actions")
                    && !req.prompt.contains(&"d".repeat(PLANNER_DOM_MAX_CHARS + 1))
            })
            .times(1)
            .returning(|_| Ok(r#"[{"type":"screenshot","description":"look"}]"#.to_string()));

        let dom = "d".repeat(PLANNER_DOM_MAX_CHARS * 2);
        let options = PlanOptions {
            max_actions: Some(7),
            ..PlanOptions::default()
        };
        let plan = planner(client)
            .plan_actions("find the docs", &[0], &dom, &options)
            .await;
        assert_eq!(plan.actions.len(), 1);
    }

    #[tokio::test]
    async fn truncates_oversized_plans() {
        let client = scripted(|| {
            let actions: Vec<_> = (0..8)
                .map(|i| json!({"type":"wait","duration":i,"description":"w"}))
                .collect();
            Ok(serde_json::to_string(&actions).unwrap())
        });
        let options = PlanOptions {
            max_actions: Some(5),
            ..PlanOptions::default()
        };

        let plan = planner(client).plan_actions("t", &[0], "", &options).await;
        assert_eq!(plan.actions.len(), 5);
        assert_eq!(plan.truncated_from, Some(8));
    }

    #[tokio::test]
    async fn model_failure_falls_back_to_single_screenshot() {
        let client = scripted(|| Err(AutomationError::Transport("boom".into())));
        let plan = planner(client)
            .plan_actions("t", &[0], "", &PlanOptions::default())
            .await;

        assert!(plan.fallback);
        assert_eq!(plan.actions.len(), 1);
        assert!(matches!(plan.actions[0].kind, ActionKind::Screenshot { .. }));
        assert!(plan.actions[0].id.is_some());
    }

    #[tokio::test]
    async fn unparsable_or_empty_output_falls_back() {
        for reply in ["no plan today", "[]", r#"[{"type":"teleport","description":"x"}]"#] {
            let client = scripted(move || Ok(reply.to_string()));
            let plan = planner(client)
                .plan_actions("t", &[0], "", &PlanOptions::default())
                .await;
            assert!(plan.fallback, "reply {reply:?} should fall back");
            assert_eq!(plan.actions, fallback_plan());
        }
    }

    #[tokio::test]
    async fn missing_credential_falls_back_without_model_calls() {
        let mut client = MockModelClient::new();
        client.expect_complete().never();
        let planner = ActionPlanner::new(Arc::new(client), &AgentConfig::default());

        let plan = planner
            .plan_actions("t", &[0], "", &PlanOptions::default())
            .await;
        assert!(plan.fallback);
        assert_eq!(plan.actions.len(), 1);
    }
}
