//! `/api/configs` — INI config file read/write + history. See spec.md §4.7
//! "Configs".

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use pio_types::task::TaskKind;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::LeaderState;

fn sanitize_filename(filename: &str) -> Result<&str, ApiError> {
    if filename.contains('/') || filename.contains("..") {
        return Err(ApiError::BadRequest("invalid config filename".into()));
    }
    if !filename.ends_with(".ini") {
        return Err(ApiError::BadRequest("config filename must end in `.ini`".into()));
    }
    Ok(filename)
}

pub async fn get_config(
    State(state): State<LeaderState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let filename = sanitize_filename(&filename)?;
    match state.store.latest_config(filename).await? {
        Some(row) => Ok(Json(row)),
        None => Err(ApiError::NotFound(format!("no config named `{filename}`"))),
    }
}

pub async fn config_history(
    State(state): State<LeaderState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let filename = sanitize_filename(&filename)?;
    Ok(Json(state.store.config_history(filename).await?))
}

pub async fn list_configs(State(state): State<LeaderState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_config_filenames().await?))
}

#[derive(Debug, Deserialize)]
pub struct WriteConfigRequest {
    pub data: String,
}

/// Validates the body as INI (duplicate section/option and parse errors are
/// 400), special-cases `config.ini`'s required cluster-topology keys,
/// normalizes Unicode dashes, appends a history revision, then enqueues
/// `write_config_and_sync` targeting the file's unit (or `$broadcast` for
/// the shared `config.ini`).
pub async fn write_config(
    State(state): State<LeaderState>,
    Path(filename): Path<String>,
    Json(body): Json<WriteConfigRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let filename = sanitize_filename(&filename)?.to_string();
    let normalized = normalize_dashes(&body.data);
    let ini = parse_ini(&normalized).map_err(ApiError::BadRequest)?;

    if filename == "config.ini" {
        validate_cluster_topology(&ini)?;
    }

    state.store.append_config_revision(&filename, &normalized).await?;

    let (target, flag) = match filename.strip_prefix("config_").and_then(|rest| rest.strip_suffix(".ini")) {
        Some(unit) => (unit.to_string(), "--specific"),
        None => (pio_types::BROADCAST.to_string(), "--shared"),
    };
    let payload = serde_json::json!({
        "filename": filename,
        "data": normalized,
        "target": target,
        "flag": flag,
    });
    let task_id = state.tasks.enqueue(TaskKind::WriteConfigAndSync, payload).await?;

    match state.tasks.wait_for_completion(&task_id, std::time::Duration::from_secs(75)).await? {
        Some(task) if task.state == pio_types::task::TaskState::Complete => Ok(StatusCode::OK),
        Some(_) => Err(ApiError::BadRequest("failed to sync config to target".into())),
        None => Err(ApiError::Timeout),
    }
}

fn normalize_dashes(data: &str) -> String {
    data.replace(['\u{2013}', '\u{2014}'], "-")
}

/// Minimal INI structure: ordered sections, each an ordered list of
/// `key = value` pairs. Good enough to detect duplicate sections/options and
/// to look up `[section] key` for validation.
struct Ini {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl Ini {
    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .and_then(|(_, kvs)| kvs.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v.as_str())
    }

    fn has_section(&self, section: &str) -> bool {
        self.sections.iter().any(|(name, _)| name == section)
    }
}

fn parse_ini(data: &str) -> Result<Ini, String> {
    let mut sections: Vec<(String, Vec<(String, String)>)> = Vec::new();
    let mut current: Option<String> = None;

    for (lineno, raw_line) in data.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix('[') {
            let name = stripped
                .strip_suffix(']')
                .ok_or_else(|| format!("malformed section header on line {}", lineno + 1))?
                .trim()
                .to_string();
            if sections.iter().any(|(existing, _)| existing == &name) {
                return Err(format!("duplicate section `[{name}]`"));
            }
            sections.push((name.clone(), Vec::new()));
            current = Some(name);
            continue;
        }
        let Some(section) = &current else {
            return Err(format!("key outside any section on line {}", lineno + 1));
        };
        let Some((key, value)) = line.split_once('=') else {
            return Err(format!("malformed `key = value` on line {}", lineno + 1));
        };
        let key = key.trim().to_string();
        let value = value.trim().to_string();
        let entry = sections.iter_mut().find(|(name, _)| name == section).unwrap();
        if entry.1.iter().any(|(existing, _)| existing == &key) {
            return Err(format!("duplicate option `{key}` in `[{section}]`"));
        }
        entry.1.push((key, value));
    }

    Ok(Ini { sections })
}

fn validate_cluster_topology(ini: &Ini) -> Result<(), ApiError> {
    let mut missing = Vec::new();
    if ini.get("cluster.topology", "leader_hostname").is_none() {
        missing.push("cluster.topology.leader_hostname");
    }
    if ini.get("cluster.topology", "leader_address").is_none() {
        missing.push("cluster.topology.leader_address");
    }
    if !ini.has_section("mqtt") {
        missing.push("mqtt");
    }
    if !missing.is_empty() {
        return Err(ApiError::BadRequest(format!("Missing required field(s): {}", missing.join(", "))));
    }

    for (section, key) in [("cluster.topology", "leader_address"), ("mqtt", "broker_address")] {
        if let Some(value) = ini.get(section, key) {
            if value.starts_with("http://") || value.starts_with("https://") {
                return Err(ApiError::BadRequest(format!("`{section}.{key}` must not include a scheme")));
            }
        }
    }
    Ok(())
}
