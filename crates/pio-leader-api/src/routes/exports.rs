//! `/api/export_datasets` — serializes on `export-data-lock`, waits up to
//! 5 minutes for the export task to finish. See spec.md §4.7 "Exports".

use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use pio_types::task::TaskKind;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::LeaderState;

const EXPORT_WAIT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    #[serde(rename = "selectedDatasets")]
    pub selected_datasets: Vec<String>,
    #[serde(rename = "experimentSelection")]
    pub experiment_selection: Vec<String>,
    #[serde(rename = "partitionByUnitSelection")]
    pub partition_by_unit_selection: bool,
    #[serde(rename = "partitionByExperimentSelection")]
    pub partition_by_experiment_selection: bool,
}

pub async fn export_datasets(
    State(state): State<LeaderState>,
    Json(body): Json<ExportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = serde_json::json!({
        "selectedDatasets": body.selected_datasets,
        "experimentSelection": body.experiment_selection,
        "partitionByUnitSelection": body.partition_by_unit_selection,
        "partitionByExperimentSelection": body.partition_by_experiment_selection,
    });
    let task_id = state.tasks.enqueue(TaskKind::PioRunExportExperimentData, payload).await?;

    match state.tasks.wait_for_completion(&task_id, EXPORT_WAIT).await? {
        Some(task) if task.state == pio_types::task::TaskState::Complete => {
            let filename = task
                .result
                .as_ref()
                .and_then(|r| r.get("filename"))
                .and_then(|f| f.as_str())
                .map(str::to_string)
                .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("export task completed without a filename")))?;
            Ok(Json(serde_json::json!({ "filename": filename })))
        }
        Some(task) => Err(ApiError::Internal(anyhow::anyhow!(
            "export task failed: {}",
            task.error.unwrap_or_default()
        ))),
        None => Err(ApiError::Timeout),
    }
}
