//! Screen analysis: screenshot (+ DOM excerpt) in, structured element list out.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::dom::{PERCEPTION_DOM_MAX_CHARS, dom_excerpt};
use crate::error::{AutomationError, Result};
use crate::json_extract::extract_json_object;
use crate::llm::{CompletionRequest, ModelClient, resolve_api_key};
use crate::types::ScreenAnalysis;

const PERCEPTION_PROMPT: &str = r#"You are analyzing a screenshot of a web page to support browser automation.

Identify every interactive element visible on the page (buttons, inputs, links, forms) plus any text that matters for navigating it.

Respond with ONLY a JSON object of this exact shape:
{
  "pageDescription": "one or two sentences describing the page",
  "elements": [
    {
      "type": "button" | "input" | "link" | "text" | "form" | "other",
      "description": "what the element is or does",
      "selector": "CSS selector if it can be inferred (optional)",
      "boundingBox": {"x": 0, "y": 0, "width": 0, "height": 0}
    }
  ],
  "interactiveElementCount": 0
}

Prefer selectors using id, name, aria-label or data-* attributes seen in the DOM excerpt."#;

pub struct ScreenAnalyzer {
    client: Arc<dyn ModelClient>,
    model: String,
    default_api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

fn build_prompt(dom_snapshot: Option<&str>) -> String {
    let mut prompt = PERCEPTION_PROMPT.to_string();
    if let Some(dom) = dom_snapshot.filter(|d| !d.trim().is_empty()) {
        prompt.push_str("\n\nDOM excerpt for grounding:\n");
        prompt.push_str(dom_excerpt(dom, PERCEPTION_DOM_MAX_CHARS));
    }
    prompt
}

/// Strict parse of the first JSON object in `raw`. The element count is
/// recomputed when the model's own figure is missing or inconsistent.
pub fn parse_analysis(raw: &str) -> Result<ScreenAnalysis> {
    let json = extract_json_object(raw)
        .ok_or_else(|| AutomationError::Parse("no JSON object in perception reply".to_string()))?;
    let mut analysis: ScreenAnalysis = serde_json::from_str(json)?;
    if analysis.interactive_element_count > analysis.elements.len() {
        analysis.interactive_element_count = analysis.elements.len();
    }
    Ok(analysis)
}

impl ScreenAnalyzer {
    pub fn new(client: Arc<dyn ModelClient>, config: &AgentConfig) -> Self {
        Self {
            client,
            model: config.vision_model.clone(),
            default_api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.vision_max_tokens,
        }
    }

    /// Never fails: any problem yields [`ScreenAnalysis::degraded`] so planning
    /// can continue from the DOM alone.
    pub async fn analyze_screen(
        &self,
        screenshot: &[u8],
        dom_snapshot: Option<&str>,
        api_key: Option<&str>,
    ) -> ScreenAnalysis {
        match self.try_analyze(screenshot, dom_snapshot, api_key).await {
            Ok(analysis) => {
                debug!(
                    target: "perception",
                    elements = analysis.elements.len(),
                    "screen analyzed"
                );
                analysis
            }
            Err(e) => {
                warn!(target: "perception", "screen analysis degraded: {e}");
                ScreenAnalysis::degraded()
            }
        }
    }

    async fn try_analyze(
        &self,
        screenshot: &[u8],
        dom_snapshot: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<ScreenAnalysis> {
        let api_key = resolve_api_key(api_key, self.default_api_key.as_deref())?;
        let raw = self
            .client
            .complete(CompletionRequest {
                model: self.model.clone(),
                api_key,
                prompt: build_prompt(dom_snapshot),
                image_base64: Some(BASE64.encode(screenshot)),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            })
            .await?;
        parse_analysis(&raw)
    }
}
