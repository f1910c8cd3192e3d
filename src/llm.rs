use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::error::{AutomationError, Result};

/// One prompt sent to a chat-completions style model.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub api_key: String,
    pub prompt: String,
    /// Base64 PNG attached as an image part, for vision models.
    pub image_base64: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Anything that turns a prompt into raw model text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

fn usable(key: Option<&str>) -> Option<&str> {
    key.map(str::trim).filter(|key| !key.is_empty())
}

/// Explicit per-call key wins over the process-wide default.
pub fn resolve_api_key(explicit: Option<&str>, default: Option<&str>) -> Result<String> {
    usable(explicit)
        .or_else(|| usable(default))
        .map(str::to_string)
        .ok_or_else(|| {
            AutomationError::Configuration(
                "no API key supplied and OPENAI_API_KEY is not set".to_string(),
            )
        })
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiClient {
    client: Client,
    api_base: String,
}

impl OpenAiClient {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.model_timeout)
            .build()
            .map_err(|e| AutomationError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }
}

fn build_messages(request: &CompletionRequest) -> Value {
    let content = match &request.image_base64 {
        Some(image) => json!([
            {"type": "text", "text": request.prompt},
            {
                "type": "image_url",
                "image_url": {"url": format!("data:image/png;base64,{image}")}
            }
        ]),
        None => json!(request.prompt),
    };
    json!([{"role": "user", "content": content}])
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&request.api_key)
            .json(&json!({
                "model": request.model,
                "messages": build_messages(&request),
                "temperature": request.temperature,
                "max_tokens": request.max_tokens,
            }))
            .send()
            .await?;

        let status = response.status();
        let json_resp: Value = response.json().await?;

        if !status.is_success() {
            let err_msg = json_resp["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error");
            warn!(target: "llm", %status, model = %request.model, "model API error: {err_msg}");
            return Err(AutomationError::Transport(format!(
                "model API error ({status}): {err_msg}"
            )));
        }

        let content = json_resp["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AutomationError::Parse("no content in model response".to_string()))?;

        debug!(target: "llm", model = %request.model, "model replied: {content}");
        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(image: Option<&str>) -> CompletionRequest {
        CompletionRequest {
            model: "m".into(),
            api_key: "k".into(),
            prompt: "describe".into(),
            image_base64: image.map(String::from),
            temperature: 0.1,
            max_tokens: 10,
        }
    }

    #[test]
    fn explicit_key_overrides_default() {
        let key = resolve_api_key(Some("explicit"), Some("default")).unwrap();
        assert_eq!(key, "explicit");
        let key = resolve_api_key(None, Some("default")).unwrap();
        assert_eq!(key, "default");
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        assert!(matches!(
            resolve_api_key(None, None),
            Err(AutomationError::Configuration(_))
        ));
        assert!(matches!(
            resolve_api_key(Some("  "), None),
            Err(AutomationError::Configuration(_))
        ));
    }

    #[test]
    fn text_only_prompt_is_a_plain_string() {
        let messages = build_messages(&request(None));
        assert_eq!(messages[0]["content"], "describe");
    }

    #[test]
    fn image_is_sent_as_data_url_part() {
        let messages = build_messages(&request(Some("AAAA")));
        let parts = messages[0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }
}
