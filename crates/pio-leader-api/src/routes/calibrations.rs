//! `/api/workers/<u>/calibrations[...]` — fanned out to each node's UnitAPI.
//! See spec.md §4.7 "Calibrations (file-backed, per node, fanned out)".

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use pio_types::BROADCAST;
use pio_workerrpc::Verb;

use crate::error::ApiError;
use crate::state::LeaderState;

async fn targets(state: &LeaderState, pioreactor_unit: &str) -> Result<Vec<String>, ApiError> {
    if pioreactor_unit == BROADCAST {
        Ok(state.store.list_workers().await?.into_iter().filter(|w| w.is_active).map(|w| w.pioreactor_unit).collect())
    } else {
        Ok(vec![pioreactor_unit.to_string()])
    }
}

pub async fn list_calibrations(
    State(state): State<LeaderState>,
    Path(pioreactor_unit): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let units = targets(&state, &pioreactor_unit).await?;
    let results = pio_fanout::fanout(&state.rpc, Verb::Get, "/unit_api/calibrations", &units, None, None).await;
    Ok(Json(results))
}

pub async fn list_calibrations_for_device(
    State(state): State<LeaderState>,
    Path((pioreactor_unit, device)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let units = targets(&state, &pioreactor_unit).await?;
    let endpoint = format!("/unit_api/calibrations/{device}");
    let results = pio_fanout::fanout(&state.rpc, Verb::Get, &endpoint, &units, None, None).await;
    Ok(Json(results))
}

/// Fans out `PATCH .../calibrations/<device>/<name>/active`, then records
/// the leader's own view of `active_calibrations[device] = name`.
pub async fn set_active(
    State(state): State<LeaderState>,
    Path((pioreactor_unit, device, name)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let units = targets(&state, &pioreactor_unit).await?;
    let endpoint = format!("/unit_api/calibrations/{device}/{name}/active");
    let results = pio_fanout::fanout(&state.rpc, Verb::Patch, &endpoint, &units, None, None).await;

    let mut active = state.active_calibrations.write().await;
    for (unit, response) in &results {
        if response.is_some() {
            active.insert((unit.clone(), device.clone()), name.clone());
        }
    }
    drop(active);

    Ok(Json(results))
}

pub async fn delete_active(
    State(state): State<LeaderState>,
    Path((pioreactor_unit, device)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let units = targets(&state, &pioreactor_unit).await?;
    let endpoint = format!("/unit_api/calibrations/{device}/active");
    let results = pio_fanout::fanout(&state.rpc, Verb::Delete, &endpoint, &units, None, None).await;

    let mut active = state.active_calibrations.write().await;
    for unit in &units {
        active.remove(&(unit.clone(), device.clone()));
    }
    drop(active);

    Ok(Json(results))
}

pub async fn delete_calibration(
    State(state): State<LeaderState>,
    Path((pioreactor_unit, device, name)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let units = targets(&state, &pioreactor_unit).await?;
    let endpoint = format!("/unit_api/calibrations/{device}/{name}");
    let results = pio_fanout::fanout(&state.rpc, Verb::Delete, &endpoint, &units, None, None).await;

    let mut active = state.active_calibrations.write().await;
    for unit in &units {
        if active.get(&(unit.clone(), device.clone())) == Some(&name) {
            active.remove(&(unit.clone(), device.clone()));
        }
    }
    drop(active);

    Ok(Json(results))
}
