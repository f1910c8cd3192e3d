//! Error types for web-pilot

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutomationError {
    /// Missing or unusable credential / settings
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Model endpoint could not be reached or answered with an error status
    #[error("transport error: {0}")]
    Transport(String),

    /// Model output did not have the expected shape
    #[error("parse error: {0}")]
    Parse(String),

    /// A single browser primitive failed
    #[error("action failed: {0}")]
    Action(String),

    /// Context/page level browser failure
    #[error("browser error: {0}")]
    Browser(String),

    /// The browser process could not be launched
    #[error("failed to start browser session: {0}")]
    SessionInit(String),

    #[error("too many actions: {count} exceeds the maximum of {max}")]
    TooManyActions { count: usize, max: usize },

    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for AutomationError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for AutomationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AutomationError>;
