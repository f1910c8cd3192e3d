//! Agentic browser automation: perceive a page, plan UI actions with a model,
//! validate them and run them against a headless Chrome session.

pub mod config;
pub mod dom;
pub mod error;
pub mod executor;
pub mod hands;
pub mod json_extract;
pub mod llm;
pub mod orchestrator;
pub mod perception;
pub mod planner;
pub mod server;
pub mod types;
pub mod validator;

pub use config::AgentConfig;
pub use error::{AutomationError, Result};
pub use executor::{ActionDriver, ActionExecutor, ExecuteOptions, ProgressUpdate};
pub use hands::{BrowserOptions, SessionManager};
pub use orchestrator::{AutomationEvent, Orchestrator};
pub use perception::ScreenAnalyzer;
pub use planner::{ActionPlanner, Plan, PlanOptions};
pub use types::*;
pub use validator::{ValidationResult, validate_actions, validate_raw_actions};
