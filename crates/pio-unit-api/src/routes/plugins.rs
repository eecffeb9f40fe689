//! `/unit_api/plugins/*`. Install/uninstall gated by `DISALLOW_UI_INSTALLS`.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use pio_types::feature_flags;
use pio_types::task::{TaskKind, TaskState};

use crate::error::ApiError;
use crate::state::UnitApiState;

const LIST_INSTALLED_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
pub struct InstalledPlugin {
    pub file: String,
}

/// `GET /plugins/installed` -- enqueues `pio plugins list --json`, blocks
/// for up to 10 seconds, and returns its parsed JSON output (the last line
/// of stdout, since a misbehaving plugin can print to stdout before the
/// JSON). An unfinished or failed task yields an empty list rather than an
/// error, matching the retrieved source.
pub async fn list_installed(State(state): State<UnitApiState>) -> Result<impl IntoResponse, ApiError> {
    let task_id = state
        .tasks
        .enqueue(TaskKind::PioPluginsList, serde_json::json!({}))
        .await?;

    let task = match state.tasks.wait_for_completion(&task_id, LIST_INSTALLED_WAIT).await? {
        Some(task) if task.state == TaskState::Complete => task,
        _ => return Ok(Json(Vec::<InstalledPlugin>::new())),
    };

    let stdout = task.result.as_ref().and_then(|r| r.get("stdout")).and_then(|v| v.as_str()).unwrap_or("");
    let last_line = stdout.lines().last().unwrap_or("").trim();
    let plugins: Vec<InstalledPlugin> = serde_json::from_str(last_line).unwrap_or_default();
    Ok(Json(plugins))
}

/// `GET /plugins/installed/<file>` -- contents of one installed plugin file.
pub async fn get_installed(
    State(state): State<UnitApiState>,
    Path(file): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if file.contains("..") || file.contains('/') {
        return Err(ApiError::BadRequest("invalid plugin filename".into()));
    }
    let path = state.plugins_dir().join(&file);
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => Ok(body),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::NotFound(format!("no such plugin `{file}`")))
        }
        Err(err) => Err(ApiError::Internal(err.into())),
    }
}

#[derive(Debug, Deserialize)]
pub struct PluginNameBody {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct EnqueuedTask {
    pub task_id: String,
}

fn check_installs_allowed(state: &UnitApiState) -> Result<(), ApiError> {
    if feature_flags::is_disabled(&state.root, feature_flags::DISALLOW_UI_INSTALLS) {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

/// `POST /plugins/install`.
pub async fn install(
    State(state): State<UnitApiState>,
    Json(body): Json<PluginNameBody>,
) -> Result<impl IntoResponse, ApiError> {
    check_installs_allowed(&state)?;
    let task_id = state
        .tasks
        .enqueue(TaskKind::PioPluginsInstall, serde_json::json!({ "name": body.name }))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(EnqueuedTask { task_id })))
}

/// `POST /plugins/uninstall`.
pub async fn uninstall(
    State(state): State<UnitApiState>,
    Json(body): Json<PluginNameBody>,
) -> Result<impl IntoResponse, ApiError> {
    check_installs_allowed(&state)?;
    let task_id = state
        .tasks
        .enqueue(TaskKind::PioPluginsUninstall, serde_json::json!({ "name": body.name }))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(EnqueuedTask { task_id })))
}
