//! `/unit_api/jobs/*`. See spec.md §4.8.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use pio_types::task::TaskKind;

use crate::error::ApiError;
use crate::state::UnitApiState;

#[derive(Debug, Default, Deserialize)]
pub struct RunJobBody {
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueuedTask {
    pub task_id: String,
}

/// `POST /jobs/run/job_name/<job>` -- rate-limited 1 s per job name.
pub async fn run_job(
    State(state): State<UnitApiState>,
    Path(job): Path<String>,
    Json(body): Json<RunJobBody>,
) -> Result<impl IntoResponse, ApiError> {
    if state.cache.debounce(&format!("run:{job}"), Duration::from_secs(1)) {
        return Err(ApiError::Conflict(format!(
            "job `{job}` was started too recently"
        )));
    }

    let payload = serde_json::json!({
        "job_name": job,
        "options": body.options,
        "args": body.args,
        "env": body.env,
    });
    let task_id = state.tasks.enqueue(TaskKind::PioRun, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(EnqueuedTask { task_id })))
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StopJobFilter {
    pub job_name: Option<String>,
    pub experiment: Option<String>,
    pub job_source: Option<String>,
    pub job_id: Option<String>,
}

async fn enqueue_stop(
    state: &UnitApiState,
    filter: StopJobFilter,
) -> Result<EnqueuedTask, ApiError> {
    let payload = serde_json::to_value(&filter).map_err(|e| ApiError::Internal(e.into()))?;
    let task_id = state.tasks.enqueue(TaskKind::PioKill, payload).await?;
    Ok(EnqueuedTask { task_id })
}

/// `POST /jobs/stop` -- filters by `{job_name, experiment, job_source,
/// job_id}`, any of which may be absent.
pub async fn stop_job(
    State(state): State<UnitApiState>,
    Json(filter): Json<StopJobFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let task = enqueue_stop(&state, filter).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// `POST /jobs/stop/job_name/<job>` -- deprecated shorthand for [`stop_job`].
pub async fn stop_job_by_name(
    State(state): State<UnitApiState>,
    Path(job_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = enqueue_stop(
        &state,
        StopJobFilter { job_name: Some(job_name), ..Default::default() },
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// `POST /jobs/stop/experiment/<experiment>` -- used by the leader's
/// experiment-delete and unassign fanouts.
pub async fn stop_job_by_experiment(
    State(state): State<UnitApiState>,
    Path(experiment): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = enqueue_stop(
        &state,
        StopJobFilter { experiment: Some(experiment), ..Default::default() },
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// `POST /jobs/stop/all` -- fanned out when a worker transitions inactive.
pub async fn stop_all_jobs(State(state): State<UnitApiState>) -> Result<impl IntoResponse, ApiError> {
    let task = enqueue_stop(&state, StopJobFilter::default()).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

#[derive(Debug, Serialize)]
pub struct RunningJob {
    pub job_name: String,
    pub job_source: Option<String>,
    pub experiment: String,
    pub job_id: Option<String>,
    pub pid: Option<i64>,
}

/// `GET /jobs/running` -- reads the local metadata table of running jobs.
pub async fn list_running_jobs(
    State(state): State<UnitApiState>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = state
        .metadata
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT job_name, job_source, experiment, job_id, pid FROM pio_job_metadata",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(RunningJob {
                        job_name: row.get(0)?,
                        job_source: row.get(1)?,
                        experiment: row.get(2)?,
                        job_id: row.get(3)?,
                        pid: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;
    Ok(Json(jobs))
}

#[derive(Debug, Serialize)]
pub struct JobSetting {
    pub setting: String,
    pub value: Option<String>,
}

/// `GET /jobs/settings/job_name/<job>` -- every published setting for a job,
/// joined from `pio_job_published_settings`.
pub async fn get_job_settings(
    State(state): State<UnitApiState>,
    Path(job): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state
        .metadata
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT setting, value FROM pio_job_published_settings WHERE job_name = ?1",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![job], |row| {
                    Ok(JobSetting { setting: row.get(0)?, value: row.get(1)? })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;
    Ok(Json(settings))
}

/// `GET /jobs/settings/job_name/<job>/setting/<k>` -- a single setting.
pub async fn get_job_setting(
    State(state): State<UnitApiState>,
    Path((job, setting)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let value = state
        .metadata
        .call(move |conn| {
            conn.query_row(
                "SELECT value FROM pio_job_published_settings WHERE job_name = ?1 AND setting = ?2",
                rusqlite::params![job, setting],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
        })
        .await?;

    match value {
        Some(value) => Ok(Json(serde_json::json!({ "value": value }))),
        None => Err(ApiError::NotFound("setting not found".into())),
    }
}

/// `PATCH /jobs/settings/job_name/<job>[/setting/<k>]` -- left unimplemented.
/// The source this was distilled from returns 503 here rather than
/// implementing a write path; this follows that rather than guessing at
/// semantics that were never specified.
pub async fn update_job_setting() -> ApiError {
    ApiError::NotImplemented
}
