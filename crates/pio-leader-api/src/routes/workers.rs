//! `/api/workers` — CRUD, activation, and experiment assignment. See
//! spec.md §4.7.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use pio_store::assignments::AssignResult;
use pio_workerrpc::Verb;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::LeaderState;

#[derive(Debug, Deserialize)]
pub struct UpsertWorkerRequest {
    pub pioreactor_unit: String,
}

/// Idempotent: re-PUTting the same unit yields a single row, 201 each time
/// (spec.md §8 "Idempotence").
pub async fn upsert_worker(
    State(state): State<LeaderState>,
    Json(body): Json<UpsertWorkerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.upsert_worker(&body.pioreactor_unit).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "pioreactor_unit": body.pioreactor_unit }))))
}

pub async fn list_workers(State(state): State<LeaderState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_workers().await?))
}

pub async fn get_worker(
    State(state): State<LeaderState>,
    Path(pioreactor_unit): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.store.get_worker(&pioreactor_unit).await? {
        Some(worker) => Ok(Json(worker)),
        None => Err(ApiError::NotFound(format!("worker `{pioreactor_unit}` not found"))),
    }
}

pub async fn remove_worker(
    State(state): State<LeaderState>,
    Path(pioreactor_unit): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.remove_worker(&pioreactor_unit).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

/// Transitioning `active -> inactive` must fan out `POST
/// /unit_api/jobs/stop/all` to the worker (spec.md §4.7 state machine).
pub async fn set_worker_active(
    State(state): State<LeaderState>,
    Path(pioreactor_unit): Path<String>,
    Json(body): Json<SetActiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let worker = state
        .store
        .get_worker(&pioreactor_unit)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("worker `{pioreactor_unit}` not found")))?;

    if body.is_active {
        state.store.upsert_worker(&pioreactor_unit).await?;
    } else {
        state.store.deactivate_worker(&pioreactor_unit).await?;
        if worker.is_active {
            let rpc = state.rpc.clone();
            let unit = pioreactor_unit.clone();
            tokio::spawn(async move {
                rpc.call(&unit, Verb::Post, "/unit_api/jobs/stop/all", None).await;
            });
        }
    }
    Ok(StatusCode::OK)
}

pub async fn get_worker_experiment(
    State(state): State<LeaderState>,
    Path(pioreactor_unit): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.store.get_assignment(&pioreactor_unit).await? {
        Some(assignment) => Ok(Json(assignment).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("worker `{pioreactor_unit}` is not assigned to an experiment") })),
        )
            .into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub experiment: String,
}

pub async fn assign_worker(
    State(state): State<LeaderState>,
    Path(pioreactor_unit): Path<String>,
    Json(body): Json<AssignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    match state.store.assign_worker(&pioreactor_unit, &body.experiment).await? {
        AssignResult::Assigned => Ok(StatusCode::OK),
        AssignResult::UnknownReference => {
            Err(ApiError::Conflict("worker or experiment does not exist".into()))
        }
    }
}

/// Unassigns the worker, then fans out a stop for the experiment it was
/// just removed from.
pub async fn unassign_worker(
    State(state): State<LeaderState>,
    Path(pioreactor_unit): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(assignment) = state.store.get_assignment(&pioreactor_unit).await? else {
        return Err(ApiError::NotFound(format!("worker `{pioreactor_unit}` is not assigned")));
    };
    state.store.unassign_worker(&pioreactor_unit).await?;

    let endpoint = format!("/unit_api/jobs/stop/experiment/{}", assignment.experiment);
    let rpc = state.rpc.clone();
    let unit = pioreactor_unit.clone();
    tokio::spawn(async move {
        rpc.call(&unit, Verb::Post, &endpoint, None).await;
    });

    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct SetupWorkerRequest {
    pub version: String,
    pub model: String,
}

/// Enqueues `AddNewPioreactor` and synchronously awaits it up to 250 s
/// (spec.md §5's suspension-point table).
pub async fn setup_worker(
    State(state): State<LeaderState>,
    Path(pioreactor_unit): Path<String>,
    Json(body): Json<SetupWorkerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = serde_json::json!({
        "pioreactor_unit": pioreactor_unit,
        "version": body.version,
        "model": body.model,
    });
    let id = state.tasks.enqueue(pio_types::task::TaskKind::AddNewPioreactor, payload).await?;

    match state.tasks.wait_for_completion(&id, std::time::Duration::from_secs(250)).await? {
        Some(task) if task.state == pio_types::task::TaskState::Complete => {
            Ok(Json(task.result.unwrap_or(serde_json::Value::Null)).into_response())
        }
        Some(task) => Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "msg": task.error }))).into_response()),
        None => Err(ApiError::Timeout),
    }
}
