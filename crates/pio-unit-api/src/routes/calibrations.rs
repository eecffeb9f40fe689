//! `/unit_api/calibrations/*`. Calibration artifacts are opaque YAML blobs
//! on disk (`<root>/storage/calibrations/<device>/<name>.yaml`); this module
//! only validates shape (non-empty, safe path segments) and maintains the
//! per-node active-calibration table. See spec.md §3, §4.7, §8.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::UnitApiState;

fn safe_segment(segment: &str) -> Result<(), ApiError> {
    if segment.is_empty() || segment.contains('/') || segment.contains("..") {
        return Err(ApiError::BadRequest(format!("invalid path segment `{segment}`")));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct CalibrationsByDevice(BTreeMap<String, Vec<String>>);

/// `GET /calibrations` -- every calibration name, grouped by device.
pub async fn list_all(State(state): State<UnitApiState>) -> Result<impl IntoResponse, ApiError> {
    let root = state.calibrations_dir();
    let mut by_device = BTreeMap::new();

    let mut device_dirs = match tokio::fs::read_dir(&root).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Json(CalibrationsByDevice(by_device)));
        }
        Err(err) => return Err(ApiError::Internal(err.into())),
    };

    while let Some(device_entry) = device_dirs
        .next_entry()
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
    {
        if !device_entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let Some(device) = device_entry.file_name().to_str().map(str::to_string) else { continue };
        let names = list_calibration_names(&root.join(&device)).await?;
        by_device.insert(device, names);
    }
    Ok(Json(CalibrationsByDevice(by_device)))
}

async fn list_calibration_names(device_dir: &std::path::Path) -> Result<Vec<String>, ApiError> {
    let mut entries = match tokio::fs::read_dir(device_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(ApiError::Internal(err.into())),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| ApiError::Internal(e.into()))? {
        if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
            names.push(stem.to_string());
        }
    }
    Ok(names)
}

/// `GET /calibrations/<device>` -- calibration names for one device.
pub async fn list_for_device(
    State(state): State<UnitApiState>,
    Path(device): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    safe_segment(&device)?;
    let names = list_calibration_names(&state.calibrations_dir().join(&device)).await?;
    Ok(Json(names))
}

/// `GET /calibrations/<device>/<name>` -- raw YAML content of one file.
pub async fn get_calibration(
    State(state): State<UnitApiState>,
    Path((device, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    safe_segment(&device)?;
    safe_segment(&name)?;
    let path = state.calibrations_dir().join(&device).join(format!("{name}.yaml"));
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => Ok(body),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::NotFound(format!("no calibration `{device}/{name}`")))
        }
        Err(err) => Err(ApiError::Internal(err.into())),
    }
}

#[derive(Debug, Deserialize)]
pub struct SaveCalibrationBody {
    pub yaml: String,
}

/// `POST /calibrations/<device>/<name>` -- write a new calibration file.
/// Validated only as "non-empty"; the rest is opaque to the core.
pub async fn save_calibration(
    State(state): State<UnitApiState>,
    Path((device, name)): Path<(String, String)>,
    Json(body): Json<SaveCalibrationBody>,
) -> Result<impl IntoResponse, ApiError> {
    safe_segment(&device)?;
    safe_segment(&name)?;
    if body.yaml.trim().is_empty() {
        return Err(ApiError::BadRequest("calibration body must not be empty".into()));
    }
    let dir = state.calibrations_dir().join(&device);
    tokio::fs::create_dir_all(&dir).await.map_err(|e| ApiError::Internal(e.into()))?;
    tokio::fs::write(dir.join(format!("{name}.yaml")), body.yaml)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;
    Ok(StatusCode::CREATED)
}

/// `PATCH /calibrations/<device>/<name>/active` -- the named file must exist
/// on disk before it can become active (spec.md §3's calibration invariant).
pub async fn set_active(
    State(state): State<UnitApiState>,
    Path((device, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    safe_segment(&device)?;
    safe_segment(&name)?;
    let path = state.calibrations_dir().join(&device).join(format!("{name}.yaml"));
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(ApiError::NotFound(format!("no calibration `{device}/{name}`")));
    }
    state.active_calibrations.write().await.set(device, name);
    state.save_active_calibrations().await?;
    Ok(StatusCode::OK)
}

/// `DELETE /calibrations/<device>/active` -- clears the active entry only;
/// the calibration file itself is untouched.
pub async fn delete_active(
    State(state): State<UnitApiState>,
    Path(device): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    safe_segment(&device)?;
    state.active_calibrations.write().await.clear(&device);
    state.save_active_calibrations().await?;
    Ok(StatusCode::OK)
}

/// `DELETE /calibrations/<device>/<name>` -- deletes the file; if it was the
/// active calibration for `device`, clears that entry too.
pub async fn delete_calibration(
    State(state): State<UnitApiState>,
    Path((device, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    safe_segment(&device)?;
    safe_segment(&name)?;
    let path = state.calibrations_dir().join(&device).join(format!("{name}.yaml"));
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("no calibration `{device}/{name}`")));
        }
        Err(err) => return Err(ApiError::Internal(err.into())),
    }

    let mut active = state.active_calibrations.write().await;
    if active.get(&device) == Some(name.as_str()) {
        active.clear(&device);
    }
    drop(active);
    state.save_active_calibrations().await?;
    Ok(StatusCode::OK)
}
