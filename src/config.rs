use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::types::{DEFAULT_EXECUTION_TIMEOUT_MS, MAX_ACTIONS};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub vision_model: String,
    pub planner_model: String,
    pub temperature: f32,
    pub vision_max_tokens: u32,
    pub planner_max_tokens: u32,
    pub model_timeout: Duration,
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    pub max_actions: usize,
    pub execution_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            vision_model: DEFAULT_MODEL.to_string(),
            planner_model: DEFAULT_MODEL.to_string(),
            temperature: 0.1,
            vision_max_tokens: 2000,
            planner_max_tokens: 4000,
            model_timeout: Duration::from_secs(60),
            chrome_path: None,
            headless: true,
            max_actions: MAX_ACTIONS,
            execution_timeout_ms: DEFAULT_EXECUTION_TIMEOUT_MS,
        }
    }
}

impl AgentConfig {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            api_key: get("OPENAI_API_KEY"),
            api_base: get("OPENAI_API_BASE").unwrap_or(defaults.api_base),
            vision_model: get("VISION_MODEL").unwrap_or(defaults.vision_model),
            planner_model: get("PLANNER_MODEL").unwrap_or(defaults.planner_model),
            temperature: parse_or("MODEL_TEMPERATURE", get("MODEL_TEMPERATURE"), defaults.temperature),
            vision_max_tokens: parse_or(
                "VISION_MAX_TOKENS",
                get("VISION_MAX_TOKENS"),
                defaults.vision_max_tokens,
            ),
            planner_max_tokens: parse_or(
                "PLANNER_MAX_TOKENS",
                get("PLANNER_MAX_TOKENS"),
                defaults.planner_max_tokens,
            ),
            model_timeout: Duration::from_secs(parse_or(
                "MODEL_TIMEOUT_SECS",
                get("MODEL_TIMEOUT_SECS"),
                defaults.model_timeout.as_secs(),
            )),
            chrome_path: get("CHROME_PATH").map(PathBuf::from),
            headless: parse_or("BROWSER_HEADLESS", get("BROWSER_HEADLESS"), defaults.headless),
            max_actions: parse_or("MAX_ACTIONS", get("MAX_ACTIONS"), defaults.max_actions),
            execution_timeout_ms: parse_or(
                "EXECUTION_TIMEOUT_MS",
                get("EXECUTION_TIMEOUT_MS"),
                defaults.execution_timeout_ms,
            ),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring unparsable setting, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AgentConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = config_from(&[]);
        assert!(config.api_key.is_none());
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.max_actions, 50);
        assert_eq!(config.execution_timeout_ms, 60_000);
        assert!(config.headless);
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("PLANNER_MODEL", "gpt-4.1"),
            ("BROWSER_HEADLESS", "false"),
            ("MAX_ACTIONS", "20"),
        ]);
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.planner_model, "gpt-4.1");
        assert!(!config.headless);
        assert_eq!(config.max_actions, 20);
    }

    #[test]
    fn blank_and_garbage_values_fall_back() {
        let config = config_from(&[("OPENAI_API_KEY", "   "), ("MAX_ACTIONS", "lots")]);
        assert!(config.api_key.is_none());
        assert_eq!(config.max_actions, 50);
    }
}
