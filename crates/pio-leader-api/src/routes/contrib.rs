//! `/api/contrib/{automations,jobs,charts,experiment_profiles,exportable_datasets}`
//! — YAML registries validated against a fixed minimal schema (every entry
//! must declare a `name`). See spec.md §6.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::LeaderState;

const CATEGORIES: &[&str] = &["automations", "jobs", "charts", "experiment_profiles", "exportable_datasets"];

fn check_category(category: &str) -> Result<(), ApiError> {
    if CATEGORIES.contains(&category) {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("unknown contrib category `{category}`")))
    }
}

fn safe_name(name: &str) -> Result<&str, ApiError> {
    if name.is_empty() || name.contains('/') || name.contains("..") {
        return Err(ApiError::BadRequest("invalid entry name".into()));
    }
    Ok(name)
}

fn entry_name(yaml: &serde_yaml::Value) -> Result<String, ApiError> {
    yaml.get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("entry is missing a required `name` field".into()))
}

pub async fn list_entries(
    State(state): State<LeaderState>,
    Path(category): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    check_category(&category)?;
    let dir = state.contrib_dir(&category);
    let mut entries = Vec::new();

    let mut read_dir = match tokio::fs::read_dir(&dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Json(entries)),
        Err(e) => return Err(ApiError::Internal(e.into())),
    };
    while let Some(entry) = read_dir.next_entry().await.map_err(|e| ApiError::Internal(e.into()))? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let body = tokio::fs::read_to_string(&path).await.map_err(|e| ApiError::Internal(e.into()))?;
        if let Ok(value) = serde_yaml::from_str::<serde_yaml::Value>(&body) {
            entries.push(value);
        }
    }
    Ok(Json(entries))
}

pub async fn get_entry(
    State(state): State<LeaderState>,
    Path((category, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    check_category(&category)?;
    let name = safe_name(&name)?;
    let path = state.contrib_dir(&category).join(format!("{name}.yaml"));
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => {
            let value: serde_yaml::Value =
                serde_yaml::from_str(&body).map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?;
            Ok(Json(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::NotFound(format!("no `{category}` entry named `{name}`")))
        }
        Err(e) => Err(ApiError::Internal(e.into())),
    }
}

#[derive(Debug, Deserialize)]
pub struct ContribBody {
    pub yaml: String,
}

pub async fn create_entry(
    State(state): State<LeaderState>,
    Path(category): Path<String>,
    Json(body): Json<ContribBody>,
) -> Result<impl IntoResponse, ApiError> {
    check_category(&category)?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&body.yaml).map_err(|e| ApiError::BadRequest(format!("invalid YAML: {e}")))?;
    let name = entry_name(&value)?;

    let dir = state.contrib_dir(&category);
    tokio::fs::create_dir_all(&dir).await.map_err(|e| ApiError::Internal(e.into()))?;
    tokio::fs::write(dir.join(format!("{name}.yaml")), body.yaml)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "name": name }))))
}

pub async fn update_entry(
    State(state): State<LeaderState>,
    Path((category, name)): Path<(String, String)>,
    Json(body): Json<ContribBody>,
) -> Result<impl IntoResponse, ApiError> {
    check_category(&category)?;
    let name = safe_name(&name)?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&body.yaml).map_err(|e| ApiError::BadRequest(format!("invalid YAML: {e}")))?;
    let declared_name = entry_name(&value)?;
    if declared_name != name {
        return Err(ApiError::BadRequest("entry `name` field must match the URL".into()));
    }

    let path = state.contrib_dir(&category).join(format!("{name}.yaml"));
    if tokio::fs::metadata(&path).await.is_err() {
        return Err(ApiError::NotFound(format!("no `{category}` entry named `{name}`")));
    }
    tokio::fs::write(path, body.yaml).await.map_err(|e| ApiError::Internal(e.into()))?;
    Ok(StatusCode::OK)
}

pub async fn delete_entry(
    State(state): State<LeaderState>,
    Path((category, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    check_category(&category)?;
    let name = safe_name(&name)?;
    let path = state.contrib_dir(&category).join(format!("{name}.yaml"));
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::NotFound(format!("no `{category}` entry named `{name}`")))
        }
        Err(e) => Err(ApiError::Internal(e.into())),
    }
}
