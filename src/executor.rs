use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{AutomationError, Result};
use crate::types::{
    ActionExecutionResult, ActionKind, AutomationAction, DEFAULT_EXECUTION_TIMEOUT_MS,
    DEFAULT_SESSION_ID, MAX_ACTIONS,
};

/// Pause between consecutive actions so the page can settle.
pub const SETTLE_DELAY: Duration = Duration::from_millis(200);
pub const TIMEOUT_MESSAGE: &str = "Execution timeout";

/// Browser primitives the executor and orchestrator drive.
///
/// `execute_action` returns `Ok(false)` when the primitive ran but reported
/// failure and `Err` when the engine raised; the executor turns both into a
/// failed result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionDriver: Send + Sync {
    /// Makes sure the session's page exists. Browser launch failures surface here.
    async fn open_session(&self, session_id: &str) -> Result<()>;

    async fn execute_action(&self, session_id: &str, action: &AutomationAction) -> Result<bool>;

    async fn capture_screenshot(&self, session_id: &str, full_page: bool) -> Result<Vec<u8>>;

    async fn navigate(&self, session_id: &str, url: &str) -> Result<()>;

    async fn record_round(
        &self,
        session_id: &str,
        actions: &[AutomationAction],
        results: &[ActionExecutionResult],
    );
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub session_id: String,
    /// Zero-based position of the action just finished.
    pub index: usize,
    pub total: usize,
    pub result: ActionExecutionResult,
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

#[derive(Clone)]
pub struct ExecuteOptions {
    pub session_id: String,
    pub max_actions: usize,
    pub timeout_ms: u64,
    pub on_progress: Option<ProgressCallback>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            session_id: DEFAULT_SESSION_ID.to_string(),
            max_actions: MAX_ACTIONS,
            timeout_ms: DEFAULT_EXECUTION_TIMEOUT_MS,
            on_progress: None,
        }
    }
}

impl std::fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("session_id", &self.session_id)
            .field("max_actions", &self.max_actions)
            .field("timeout_ms", &self.timeout_ms)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

pub struct ActionExecutor<D: ?Sized> {
    driver: Arc<D>,
}

impl<D: ActionDriver + ?Sized> ActionExecutor<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self { driver }
    }

    /// Runs `actions` in order against one session.
    ///
    /// Errors only when the batch is longer than `max_actions`, before anything
    /// is dispatched. Every other failure becomes a result entry. The returned
    /// vector lines up with the prefix of `actions` that was attempted.
    pub async fn execute_actions(
        &self,
        actions: &[AutomationAction],
        options: &ExecuteOptions,
    ) -> Result<Vec<ActionExecutionResult>> {
        if actions.len() > options.max_actions {
            return Err(AutomationError::TooManyActions {
                count: actions.len(),
                max: options.max_actions,
            });
        }

        let total = actions.len();
        let deadline = Duration::from_millis(options.timeout_ms);
        let started = Instant::now();
        let mut results = Vec::with_capacity(total);

        info!(target: "executor", session = %options.session_id, total, "executing actions");

        for (index, action) in actions.iter().enumerate() {
            if started.elapsed() > deadline {
                warn!(
                    target: "executor",
                    session = %options.session_id,
                    index,
                    skipped = total - index,
                    "execution timeout, stopping batch"
                );
                results.push(ActionExecutionResult::failed(action.clone(), TIMEOUT_MESSAGE, 0));
                break;
            }

            let result = self.run_one(&options.session_id, action).await;
            if !result.success {
                warn!(
                    target: "executor",
                    session = %options.session_id,
                    index,
                    kind = action.kind_name(),
                    error = result.error.as_deref().unwrap_or_default(),
                    "action failed"
                );
            }

            if let Some(on_progress) = &options.on_progress {
                on_progress(&ProgressUpdate {
                    session_id: options.session_id.clone(),
                    index,
                    total,
                    result: result.clone(),
                });
            }
            results.push(result);

            if index + 1 < total {
                tokio::time::sleep(SETTLE_DELAY).await;
            }
        }

        Ok(results)
    }

    async fn run_one(&self, session_id: &str, action: &AutomationAction) -> ActionExecutionResult {
        let started = Instant::now();
        let outcome = match &action.kind {
            ActionKind::Screenshot { full_page } => self
                .driver
                .capture_screenshot(session_id, full_page.unwrap_or(false))
                .await
                .map(|png| Some(BASE64.encode(png))),
            _ => match self.driver.execute_action(session_id, action).await {
                Ok(true) => Ok(None),
                Ok(false) => Err(AutomationError::Action(format!(
                    "{} action reported failure",
                    action.kind_name()
                ))),
                Err(e) => Err(e),
            },
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(screenshot) => ActionExecutionResult {
                screenshot,
                ..ActionExecutionResult::succeeded(action.clone(), duration_ms)
            },
            Err(e) => ActionExecutionResult::failed(action.clone(), e.to_string(), duration_ms),
        }
    }
}
