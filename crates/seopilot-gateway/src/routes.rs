//! API route handlers for the gateway.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use seopilot_core::{SeoPilotError, Task, TaskSpec};
use seopilot_pool::CancelOutcome;
use serde::Deserialize;

use super::server::AppState;

/// Error wrapper with the typed status mapping. `ConcurrencyConflict` should
/// never reach here (the dispatcher swallows it); if one leaks it reads as a
/// conflict.
pub struct ApiError(SeoPilotError);

impl From<SeoPilotError> for ApiError {
    fn from(e: SeoPilotError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SeoPilotError::NotFound(_) => StatusCode::NOT_FOUND,
            SeoPilotError::Validation(_) => StatusCode::BAD_REQUEST,
            SeoPilotError::InvalidStateTransition(_)
            | SeoPilotError::ConcurrencyConflict(_)
            | SeoPilotError::AlreadyRunning(_) => StatusCode::CONFLICT,
            SeoPilotError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SeoPilotError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            SeoPilotError::Handler { .. } => StatusCode::BAD_GATEWAY,
            SeoPilotError::Config(_) | SeoPilotError::Persistence(_) | SeoPilotError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "seopilot-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Create a task and enqueue it.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<TaskSpec>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = state.pool.submit(spec)?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksParams {
    pub workspace: Option<String>,
}

pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTasksParams>,
) -> Json<Vec<Task>> {
    Json(state.pool.store().list(params.workspace.as_deref()))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.pool.store().get(&id)?))
}

/// Cancel a task. Queued tasks cancel immediately; running tasks get the
/// cooperative flag and finish asynchronously.
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let outcome = state.pool.cancel(&id)?;
    Ok(Json(serde_json::json!({
        "task": state.pool.store().get(&id)?,
        "outcome": match outcome {
            CancelOutcome::Cancelled => "cancelled",
            CancelOutcome::CancelRequested => "cancel_requested",
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    pub approver: String,
}

pub async fn approve_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ApproveBody>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.gate.approve(&id, &body.approver)?))
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub approver: String,
    #[serde(default)]
    pub reason: String,
}

pub async fn reject_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RejectBody>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.gate.reject(&id, &body.approver, &body.reason)?))
}

pub async fn pool_stats(State(state): State<Arc<AppState>>) -> Json<seopilot_pool::PoolStats> {
    Json(state.pool.stats())
}

pub async fn scheduler_status(
    State(state): State<Arc<AppState>>,
) -> Json<seopilot_scheduler::SchedulerStatus> {
    Json(state.scheduler.status())
}

#[derive(Debug, Deserialize)]
pub struct ControlBody {
    /// "start", "stop", or "trigger".
    pub action: String,
    /// Job name, required for "trigger".
    pub job: Option<String>,
}

pub async fn scheduler_control(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ControlBody>,
) -> ApiResult<Json<serde_json::Value>> {
    match body.action.as_str() {
        "start" => {
            state.scheduler.start();
            Ok(Json(serde_json::json!({ "running": true })))
        }
        "stop" => {
            state.scheduler.stop().await;
            Ok(Json(serde_json::json!({ "running": false })))
        }
        "trigger" => {
            let job = body.job.as_deref().ok_or_else(|| {
                SeoPilotError::Validation("'trigger' requires a job name".into())
            })?;
            let exec = state.scheduler.trigger(job)?;
            Ok(Json(serde_json::json!({ "execution": exec })))
        }
        other => Err(SeoPilotError::Validation(format!(
            "unknown scheduler action '{other}'"
        ))
        .into()),
    }
}
