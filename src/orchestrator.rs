//! Task + screenshot + DOM in, result trail out.
//!
//! perceive -> plan -> validate -> execute -> final screenshot

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::error::{AutomationError, Result};
use crate::executor::{ActionDriver, ActionExecutor, ExecuteOptions, ProgressUpdate};
use crate::llm::ModelClient;
use crate::planner::{ActionPlanner, PlanOptions};
use crate::types::{
    ActionExecutionResult, AutomationAction, AutomationRequest, AutomationResponse,
    ExecutionSummary, session_key,
};
use crate::validator::{validate_actions, validate_raw_actions};

/// Progress published while runs are in flight.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AutomationEvent {
    RunStarted {
        session_id: String,
        task: String,
    },
    Planned {
        session_id: String,
        actions: usize,
        fallback: bool,
    },
    ActionFinished {
        session_id: String,
        index: usize,
        total: usize,
        result: ActionExecutionResult,
    },
    RunFinished {
        session_id: String,
        success: bool,
    },
}

pub struct Orchestrator<D: ?Sized> {
    driver: Arc<D>,
    executor: ActionExecutor<D>,
    planner: ActionPlanner,
    max_actions: usize,
    timeout_ms: u64,
    events: broadcast::Sender<AutomationEvent>,
}

impl<D: ActionDriver + ?Sized> Orchestrator<D> {
    pub fn new(driver: Arc<D>, client: Arc<dyn ModelClient>, config: &AgentConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            executor: ActionExecutor::new(driver.clone()),
            driver,
            planner: ActionPlanner::new(client, config),
            max_actions: config.max_actions,
            timeout_ms: config.execution_timeout_ms,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: AutomationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Full run for one request.
    ///
    /// Only a browser that cannot be launched is returned as `Err`; every other
    /// problem is reported inside the response.
    pub async fn run(&self, request: AutomationRequest) -> Result<AutomationResponse> {
        let session_id = session_key(request.session_id.as_deref()).to_string();

        if request.task.trim().is_empty() {
            return Ok(AutomationResponse::rejected(
                session_id,
                Vec::new(),
                "task must not be empty".to_string(),
            ));
        }
        let screenshot = match BASE64.decode(request.screenshot.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(AutomationResponse::rejected(
                    session_id,
                    Vec::new(),
                    AutomationError::InvalidRequest(format!("screenshot is not valid base64: {e}"))
                        .to_string(),
                ));
            }
        };

        info!(target: "orchestrator", session = %session_id, task = %request.task, "automation run started");
        self.publish(AutomationEvent::RunStarted {
            session_id: session_id.clone(),
            task: request.task.clone(),
        });

        if let Err(e) = self.prepare_session(&session_id, request.url.as_deref()).await {
            return self.fail_or_propagate(session_id, Vec::new(), e);
        }

        let plan = self
            .planner
            .plan_actions(
                &request.task,
                &screenshot,
                &request.dom_snapshot,
                &PlanOptions {
                    api_key: request.api_key.clone(),
                    max_actions: Some(self.max_actions),
                },
            )
            .await;
        self.publish(AutomationEvent::Planned {
            session_id: session_id.clone(),
            actions: plan.actions.len(),
            fallback: plan.fallback,
        });

        let mut warnings = Vec::new();
        if let Some(original) = plan.truncated_from {
            warnings.push(format!(
                "plan truncated from {original} to {} actions",
                plan.actions.len()
            ));
        }
        if plan.fallback {
            warnings.push("planning failed; fallback plan used".to_string());
        }

        let validation = validate_actions(&plan.actions, self.max_actions);
        if !validation.valid {
            warn!(target: "orchestrator", session = %session_id, errors = ?validation.errors, "plan rejected");
            let mut response = AutomationResponse::rejected(
                session_id.clone(),
                plan.actions,
                AutomationError::Validation(validation.errors).to_string(),
            );
            response.warnings = warnings;
            self.finish(&session_id, false);
            return Ok(response);
        }

        let mut response = self.execute_and_report(&session_id, plan.actions).await;
        response.warnings = warnings;
        Ok(response)
    }

    /// Runs caller-supplied actions without planning. They are validated in
    /// their raw JSON form first so unknown kinds are reported, not dropped.
    pub async fn execute_plan(
        &self,
        session_id: Option<&str>,
        raw_actions: Vec<Value>,
    ) -> Result<AutomationResponse> {
        let session_id = session_key(session_id).to_string();

        let validation = validate_raw_actions(&raw_actions, self.max_actions);
        if !validation.valid {
            return Ok(AutomationResponse::rejected(
                session_id,
                Vec::new(),
                AutomationError::Validation(validation.errors).to_string(),
            ));
        }
        let actions: Vec<AutomationAction> =
            match serde_json::from_value(Value::Array(raw_actions)) {
                Ok(actions) => actions,
                Err(e) => {
                    return Ok(AutomationResponse::rejected(
                        session_id,
                        Vec::new(),
                        AutomationError::Parse(e.to_string()).to_string(),
                    ));
                }
            };

        if let Err(e) = self.prepare_session(&session_id, None).await {
            return self.fail_or_propagate(session_id, actions, e);
        }
        Ok(self.execute_and_report(&session_id, actions).await)
    }

    async fn prepare_session(&self, session_id: &str, url: Option<&str>) -> Result<()> {
        self.driver.open_session(session_id).await?;
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.driver.navigate(session_id, url).await?;
        }
        Ok(())
    }

    fn fail_or_propagate(
        &self,
        session_id: String,
        actions: Vec<AutomationAction>,
        error: AutomationError,
    ) -> Result<AutomationResponse> {
        self.finish(&session_id, false);
        match error {
            AutomationError::SessionInit(_) => Err(error),
            other => Ok(AutomationResponse::rejected(session_id, actions, other.to_string())),
        }
    }

    async fn execute_and_report(
        &self,
        session_id: &str,
        actions: Vec<AutomationAction>,
    ) -> AutomationResponse {
        let events = self.events.clone();
        let options = ExecuteOptions {
            session_id: session_id.to_string(),
            max_actions: self.max_actions,
            timeout_ms: self.timeout_ms,
            on_progress: Some(Arc::new(move |update: &ProgressUpdate| {
                let _ = events.send(AutomationEvent::ActionFinished {
                    session_id: update.session_id.clone(),
                    index: update.index,
                    total: update.total,
                    result: update.result.clone(),
                });
            })),
        };

        let results = match self.executor.execute_actions(&actions, &options).await {
            Ok(results) => results,
            Err(e) => {
                self.finish(session_id, false);
                return AutomationResponse::rejected(session_id.to_string(), actions, e.to_string());
            }
        };
        self.driver.record_round(session_id, &actions, &results).await;

        let screenshot = match self.driver.capture_screenshot(session_id, false).await {
            Ok(png) => Some(BASE64.encode(png)),
            Err(e) => {
                warn!(target: "orchestrator", session = %session_id, "final screenshot failed: {e}");
                None
            }
        };

        let execution = ExecutionSummary::from_results(results);
        let success = execution.failed.is_empty();
        info!(
            target: "orchestrator",
            session = %session_id,
            completed = execution.completed.len(),
            failed = execution.failed.len(),
            "automation run finished"
        );
        self.finish(session_id, success);

        AutomationResponse {
            success,
            session_id: session_id.to_string(),
            actions,
            execution,
            screenshot,
            error: None,
            warnings: Vec::new(),
        }
    }

    fn finish(&self, session_id: &str, success: bool) {
        self.publish(AutomationEvent::RunFinished {
            session_id: session_id.to_string(),
            success,
        });
    }
}
