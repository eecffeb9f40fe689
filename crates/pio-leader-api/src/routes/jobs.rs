//! `/api/workers/<u>/jobs/...` — job control fanned out or bus-published to
//! workers. See spec.md §4.7 "Job control".

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use pio_types::{env::ArgsOptionsEnvs, task::TaskKind, BROADCAST};
use pio_workerrpc::Verb;
use rumqttc::QoS;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::LeaderState;

const STOP_PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolve `$broadcast`/single-unit into the concrete worker set a job-run
/// request targets, per spec.md §4.7's assignment + activity rules.
async fn resolve_run_targets(
    state: &LeaderState,
    pioreactor_unit: &str,
    experiment: &str,
) -> Result<Vec<String>, ApiError> {
    if pioreactor_unit == BROADCAST {
        let assigned = state.store.list_assignments_for_experiment(experiment).await?;
        let mut active = Vec::new();
        for assignment in assigned {
            if let Some(worker) = state.store.get_worker(&assignment.pioreactor_unit).await? {
                if worker.is_active {
                    active.push(assignment.pioreactor_unit);
                }
            }
        }
        Ok(active)
    } else {
        let assignment = state
            .store
            .get_assignment(pioreactor_unit)
            .await?
            .filter(|a| a.experiment == experiment)
            .ok_or_else(|| {
                ApiError::NotFound(format!("`{pioreactor_unit}` is not assigned to `{experiment}`"))
            })?;
        Ok(vec![assignment.pioreactor_unit])
    }
}

pub async fn run_job(
    State(state): State<LeaderState>,
    Path((pioreactor_unit, job, experiment)): Path<(String, String, String)>,
    Json(body): Json<ArgsOptionsEnvs>,
) -> Result<impl IntoResponse, ApiError> {
    let targets = resolve_run_targets(&state, &pioreactor_unit, &experiment).await?;
    if targets.is_empty() {
        return Err(ApiError::NotFound(format!("no active worker assigned to `{experiment}`")));
    }

    let env = body.sandboxed_env(&experiment);
    let payload = serde_json::json!({
        "endpoint": format!("/unit_api/jobs/run/job_name/{job}"),
        "units": targets,
        "body": { "options": body.options, "args": body.args, "env": env },
    });
    let task_id = state.tasks.enqueue(TaskKind::MulticastPost, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "task_id": task_id }))))
}

/// Attempts a 2 s QoS-1 bus publish to disconnect the job; on timeout (or no
/// bus configured) falls back to a direct `POST .../jobs/stop/job_name/<job>`
/// on the same worker.
pub async fn stop_job(
    State(state): State<LeaderState>,
    Path((pioreactor_unit, job, experiment)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let units = if pioreactor_unit == BROADCAST {
        state
            .store
            .list_assignments_for_experiment(&experiment)
            .await?
            .into_iter()
            .map(|a| a.pioreactor_unit)
            .collect()
    } else {
        vec![pioreactor_unit]
    };

    let mut any_succeeded = false;
    for unit in units {
        let via_bus = stop_via_bus(&state, &unit, &experiment, &job).await;
        if via_bus {
            any_succeeded = true;
            continue;
        }
        let endpoint = format!("/unit_api/jobs/stop/job_name/{job}");
        let response = state.rpc.call(&unit, Verb::Post, &endpoint, None).await;
        any_succeeded |= response.is_some();
    }

    if any_succeeded {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::Timeout)
    }
}

async fn stop_via_bus(state: &LeaderState, unit: &str, experiment: &str, job: &str) -> bool {
    let Some(bus) = &state.bus else { return false };
    let topic = format!("pioreactor/{unit}/{experiment}/{job}/$state/set");
    let handle = match bus.publish(topic, b"disconnected".to_vec(), QoS::AtLeastOnce, false).await {
        Ok(handle) => handle,
        Err(_) => return false,
    };
    handle.wait(STOP_PUBLISH_TIMEOUT).await.is_ok()
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    #[serde(flatten)]
    pub settings: std::collections::HashMap<String, serde_json::Value>,
}

/// Publishes each `{setting: value}` pair QoS-2 to the job's settings topic.
/// No HTTP fallback -- spec.md §4.7 only defines one for stop.
pub async fn update_job_settings(
    State(state): State<LeaderState>,
    Path((pioreactor_unit, job, experiment)): Path<(String, String, String)>,
    Json(body): Json<UpdateSettingsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(bus) = &state.bus else {
        return Err(ApiError::Timeout);
    };

    let units = if pioreactor_unit == BROADCAST {
        state
            .store
            .list_assignments_for_experiment(&experiment)
            .await?
            .into_iter()
            .map(|a| a.pioreactor_unit)
            .collect()
    } else {
        vec![pioreactor_unit]
    };

    for unit in &units {
        for (setting, value) in &body.settings {
            let topic = format!("pioreactor/{unit}/{experiment}/{job}/{setting}/set");
            let payload = match value {
                serde_json::Value::String(s) => s.clone().into_bytes(),
                other => other.to_string().into_bytes(),
            };
            bus.publish(topic, payload, QoS::ExactlyOnce, false).await?;
        }
    }
    Ok(StatusCode::ACCEPTED)
}
