//! `/run` (create) and `/runs` (list, fetch, cancel, approve, reject) —
//! split into two routers because the spec gives the singular create path
//! its own route, distinct from the plural list path.
//!
//! Grounded in the teacher's route-handler idiom (`State<AppState>` +
//! `Json<T>` extractor/responder, `AppError` for fallible paths) from
//! `routes/hooks.rs`, adapted to the run lifecycle's own operations.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use conduit_core::model::{Run, RunPatch, RunStatus};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::middleware::request_id::RequestId;
use crate::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/", axum::routing::get(list_runs))
        .route("/:run_id", axum::routing::get(get_run))
        .route("/:run_id/cancel", axum::routing::post(cancel_run))
        .route("/:run_id/approve", axum::routing::post(approve_run))
        .route("/:run_id/reject", axum::routing::post(reject_run))
}

/// `POST /run` lives on its own router (not nested under `/runs`) so it
/// matches the spec's singular create path distinctly from the plural
/// `GET /runs` list path.
pub fn create_router() -> axum::Router<AppState> {
    axum::Router::new().route("/", axum::routing::post(create_run))
}

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    pub goal: String,
    pub agent_profile_id: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    /// Opt in to `token` SSE events for this run's planner steps (spec §9).
    #[serde(default)]
    pub stream_tokens: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct CreateRunResponse {
    pub run_id: String,
    pub status: RunStatus,
    pub goal: String,
    pub agent_profile_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub message: String,
}

async fn create_run(
    State(state): State<AppState>,
    request_id: Option<axum::extract::Extension<RequestId>>,
    Json(req): Json<CreateRunRequest>,
) -> Result<Json<CreateRunResponse>, AppError> {
    if req.goal.trim().is_empty() {
        return Err(AppError::BadRequest("goal must not be empty".into()));
    }
    if conduit_core::config::find_agent_profile(&req.agent_profile_id)?.is_none() {
        return Err(AppError::BadRequest(format!(
            "unknown agent profile {}",
            req.agent_profile_id
        )));
    }

    let request_id = request_id.map(|ext| ext.0 .0);
    let run = state.container.store.create_run(
        &req.goal,
        &req.agent_profile_id,
        &req.context,
        request_id.as_deref(),
        req.stream_tokens,
    )?;

    state.container.dispatch(&run.run_id);

    Ok(Json(CreateRunResponse {
        run_id: run.run_id,
        status: run.status,
        goal: run.goal,
        agent_profile_id: run.agent_profile_id,
        created_at: run.created_at,
        message: "run created".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    20
}

#[derive(Debug, serde::Serialize)]
pub struct ListRunsResponse {
    pub runs: Vec<Run>,
    pub limit: u32,
    pub offset: u32,
    pub count: usize,
}

async fn list_runs(
    State(state): State<AppState>,
    Query(q): Query<ListRunsQuery>,
) -> Result<Json<ListRunsResponse>, AppError> {
    let status = match q.status.as_deref() {
        Some(s) => Some(
            RunStatus::parse(s).ok_or_else(|| AppError::BadRequest("invalid status filter".into()))?,
        ),
        None => None,
    };
    let runs = state.container.store.list_runs(status, q.limit, q.offset)?;
    Ok(Json(ListRunsResponse {
        count: runs.len(),
        runs,
        limit: q.limit,
        offset: q.offset,
    }))
}

async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Result<Json<Run>, AppError> {
    let run = state.container.store.require_run(&run_id)?;
    Ok(Json(run))
}

#[derive(Debug, serde::Serialize)]
pub struct RunActionResponse {
    pub run_id: String,
    pub status: RunStatus,
    pub message: String,
}

/// Idempotent: cancelling an already-terminal run is a no-op that reports
/// the run's current status rather than an error (spec §8.3).
async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunActionResponse>, AppError> {
    let run = state.container.store.require_run(&run_id)?;
    if run.status.is_terminal() {
        return Ok(Json(RunActionResponse {
            run_id: run.run_id,
            status: run.status,
            message: "run already in a terminal state".to_string(),
        }));
    }
    state
        .container
        .store
        .update_run(&run_id, RunPatch::default().status(RunStatus::Cancelled).completed_now())?;
    state
        .container
        .store
        .append_event(&run_id, "status", serde_json::json!({ "status": "cancelled" }))?;
    Ok(Json(RunActionResponse {
        run_id,
        status: RunStatus::Cancelled,
        message: "run cancelled".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub modified_arguments: Option<Value>,
    pub approver_id: String,
}

/// Idempotent: approving a run that isn't `awaiting_approval` is a no-op
/// that reports the run's current status rather than an error (spec §8.3).
async fn approve_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<RunActionResponse>, AppError> {
    let run = state.container.store.require_run(&run_id)?;
    if run.status != RunStatus::AwaitingApproval {
        return Ok(Json(RunActionResponse {
            run_id: run.run_id,
            status: run.status,
            message: "run is not awaiting approval".to_string(),
        }));
    }
    let gate = conduit_core::hitl::HitlGate::new(state.container.planner.clone());
    gate.approve(&run_id, req.modified_arguments, &req.approver_id).await?;
    let run = state.container.store.require_run(&run_id)?;
    Ok(Json(RunActionResponse {
        run_id: run.run_id,
        status: run.status,
        message: "tool call approved".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub approver_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Idempotent: rejecting a run that isn't `awaiting_approval` is a no-op
/// that reports the run's current status rather than an error (spec §8.3).
async fn reject_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<RunActionResponse>, AppError> {
    let run = state.container.store.require_run(&run_id)?;
    if run.status != RunStatus::AwaitingApproval {
        return Ok(Json(RunActionResponse {
            run_id: run.run_id,
            status: run.status,
            message: "run is not awaiting approval".to_string(),
        }));
    }
    let gate = conduit_core::hitl::HitlGate::new(state.container.planner.clone());
    gate.reject(&run_id, &req.approver_id, req.reason.as_deref()).await?;
    let run = state.container.store.require_run(&run_id)?;
    Ok(Json(RunActionResponse {
        run_id: run.run_id,
        status: run.status,
        message: "tool call rejected".to_string(),
    }))
}
