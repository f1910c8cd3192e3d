use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

use crate::error::AutomationError;
use crate::hands::SessionManager;
use crate::orchestrator::{AutomationEvent, Orchestrator};
use crate::types::{AutomationRequest, AutomationResponse, session_key};

impl AutomationEvent {
    fn to_sse_event(&self) -> Event {
        let name = match self {
            AutomationEvent::RunStarted { .. } => "run_started",
            AutomationEvent::Planned { .. } => "planned",
            AutomationEvent::ActionFinished { .. } => "action_finished",
            AutomationEvent::RunFinished { .. } => "run_finished",
        };
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Event::default().event(name).data(data)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub orchestrator: Arc<Orchestrator<SessionManager>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutePayload {
    #[serde(default)]
    session_id: Option<String>,
    actions: Vec<Value>,
}

/// Launch failures map to 503; everything else already lives in the response body.
struct ApiError(AutomationError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            AutomationError::SessionInit(_) => StatusCode::SERVICE_UNAVAILABLE,
            AutomationError::InvalidRequest(_) | AutomationError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(target: "server", %status, "request failed: {}", self.0);
        (status, Json(json!({"success": false, "error": self.0.to_string()}))).into_response()
    }
}

impl From<AutomationError> for ApiError {
    fn from(err: AutomationError) -> Self {
        Self(err)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .route("/automate", post(automate_handler))
        .route("/execute", post(execute_handler))
        .route("/sessions", get(list_sessions_handler))
        .route(
            "/sessions/{id}",
            get(get_session_handler).delete(close_session_handler),
        )
        .route("/events", get(sse_handler))
        .with_state(state)
}

async fn automate_handler(
    State(state): State<AppState>,
    Json(request): Json<AutomationRequest>,
) -> Result<Json<AutomationResponse>, ApiError> {
    info!(
        target: "server",
        session = session_key(request.session_id.as_deref()),
        "POST /automate"
    );
    Ok(Json(state.orchestrator.run(request).await?))
}

async fn execute_handler(
    State(state): State<AppState>,
    Json(payload): Json<ExecutePayload>,
) -> Result<Json<AutomationResponse>, ApiError> {
    info!(target: "server", actions = payload.actions.len(), "POST /execute");
    let response = state
        .orchestrator
        .execute_plan(payload.session_id.as_deref(), payload.actions)
        .await?;
    Ok(Json(response))
}

async fn list_sessions_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"sessions": state.sessions.session_ids().await}))
}

async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.sessions.session(&id).await {
        Some(session) => Json(session).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no session '{id}'")})),
        )
            .into_response(),
    }
}

async fn close_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let closed = state.sessions.close(Some(&id)).await?;
    Ok(Json(json!({"sessionId": id, "closed": closed})))
}

async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.orchestrator.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
