//! `/unit_api/task_results/<id>`. See spec.md §4.5: 202 while pending or
//! running, 200 + result on completion, 500 + error on failure.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use pio_types::task::TaskState;

use crate::error::ApiError;
use crate::state::UnitApiState;

pub async fn get_task_result(
    State(state): State<UnitApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .tasks
        .get_task(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no task `{id}`")))?;

    match task.state {
        TaskState::Pending | TaskState::Running | TaskState::Locked => {
            Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "state": "pending" }))))
        }
        TaskState::Complete => {
            Ok((StatusCode::OK, Json(serde_json::json!({ "result": task.result }))))
        }
        TaskState::Failed => Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": task.error })),
        )),
    }
}
