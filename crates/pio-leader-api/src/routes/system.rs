//! `/api/system/...` — guarded admin operations: upload, filesystem browse,
//! and app/ui update triggers. See spec.md §4.7.

use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use pio_types::feature_flags::{self, DISALLOW_UI_FILE_SYSTEM, DISALLOW_UI_UPLOADS};
use pio_types::task::TaskKind;

use crate::error::ApiError;
use crate::state::LeaderState;

const MAX_UPLOAD_BYTES: usize = 30 * 1024 * 1024;

fn sanitize_upload_filename(filename: &str) -> Result<&str, ApiError> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
        || filename.chars().any(|c| c.is_control())
    {
        return Err(ApiError::BadRequest("invalid upload filename".into()));
    }
    Ok(filename)
}

pub async fn upload(
    State(state): State<LeaderState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    if feature_flags::is_disabled(state.filesystem_root(), DISALLOW_UI_UPLOADS) {
        return Err(ApiError::Forbidden);
    }

    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::BadRequest(e.to_string()))? {
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("multipart field is missing a filename".into()))?;
        let filename = sanitize_upload_filename(&filename)?.to_string();
        let bytes: Bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(ApiError::BadRequest("upload exceeds the 30 MB limit".into()));
        }

        let dir = state.uploads_dir();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| ApiError::Internal(e.into()))?;
        tokio::fs::write(dir.join(&filename), &bytes).await.map_err(|e| ApiError::Internal(e.into()))?;
        return Ok((StatusCode::CREATED, Json(serde_json::json!({ "filename": filename }))));
    }

    Err(ApiError::BadRequest("no file in upload".into()))
}

/// Resolves `path` under the filesystem root with a safe join: any `..`
/// component that would escape the root is rejected, and `.sqlite*` files
/// can never be downloaded.
pub async fn browse(
    State(state): State<LeaderState>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if feature_flags::is_disabled(state.filesystem_root(), DISALLOW_UI_FILE_SYSTEM) {
        return Err(ApiError::Forbidden);
    }

    let root = state.filesystem_root();
    let mut resolved = root.to_path_buf();
    for component in path.split('/').filter(|c| !c.is_empty()) {
        if component == ".." {
            return Err(ApiError::Forbidden);
        }
        resolved.push(component);
    }
    if !resolved.starts_with(root) {
        return Err(ApiError::Forbidden);
    }
    if resolved.extension().and_then(|e| e.to_str()).map(|e| e.starts_with("sqlite")).unwrap_or(false) {
        return Err(ApiError::Forbidden);
    }

    match tokio::fs::read(&resolved).await {
        Ok(bytes) => Ok(bytes.into_response()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ApiError::NotFound(format!("no file at `{path}`"))),
        Err(e) => Err(ApiError::Internal(e.into())),
    }
}

pub async fn update_next_version(State(state): State<LeaderState>) -> Result<impl IntoResponse, ApiError> {
    let task_id = state.tasks.enqueue(TaskKind::PioUpdateEverything, serde_json::json!({})).await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "task_id": task_id }))))
}

#[derive(Debug, serde::Deserialize)]
pub struct UpdateFromArchiveRequest {
    pub archive_path: String,
}

pub async fn update_from_archive(
    State(state): State<LeaderState>,
    Json(body): Json<UpdateFromArchiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id = state
        .tasks
        .enqueue(TaskKind::PioUpdateApp, serde_json::json!({ "archive_path": body.archive_path }))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "task_id": task_id }))))
}
