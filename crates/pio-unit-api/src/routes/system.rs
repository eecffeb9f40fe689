//! `/unit_api/system/*`. See spec.md §4.8 and §9's resolved open question on
//! `remove_file`'s path whitelist.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::UnitApiState;

/// `POST /system/reboot`. On the leader, sleeps 5 s first so in-flight
/// responses (including this one) have time to drain before the node goes
/// down.
pub async fn reboot(State(state): State<UnitApiState>) -> Result<impl IntoResponse, ApiError> {
    schedule_power_command(&state, "reboot").await;
    Ok(StatusCode::OK)
}

/// `POST /system/shutdown`.
pub async fn shutdown(State(state): State<UnitApiState>) -> Result<impl IntoResponse, ApiError> {
    schedule_power_command(&state, "poweroff").await;
    Ok(StatusCode::OK)
}

async fn schedule_power_command(state: &UnitApiState, command: &'static str) {
    let delay = if state.is_leader { Duration::from_secs(5) } else { Duration::ZERO };
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(err) = tokio::process::Command::new("sudo").arg(command).status().await {
            tracing::error!(%command, error = %err, "system power command failed to spawn");
        }
    });
}

#[derive(Debug, Deserialize)]
pub struct RemoveFileBody {
    pub filepath: String,
}

/// `POST /system/remove_file`.
///
/// The intended whitelist is `path.startswith("/home/pioreactor") OR
/// path.startswith("/tmp")`. The source this was distilled from implements
/// the equivalent of `not A or not B`, which rejects almost everything; that
/// is a bug in the source, not a behavior to preserve, so this implements
/// the whitelist the comment actually describes.
pub async fn remove_file(
    State(_state): State<UnitApiState>,
    Json(body): Json<RemoveFileBody>,
) -> Result<impl IntoResponse, ApiError> {
    let allowed = body.filepath.starts_with("/home/pioreactor") || body.filepath.starts_with("/tmp");
    if !allowed {
        return Err(ApiError::BadRequest(format!(
            "refusing to remove `{}`: outside the allowed directories",
            body.filepath
        )));
    }

    match tokio::fs::remove_file(&body.filepath).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::NotFound(format!("`{}` does not exist", body.filepath)))
        }
        Err(err) => Err(ApiError::Internal(err.into())),
    }
}

#[derive(Debug, Serialize)]
pub struct UtcClock {
    pub utc_clock: String,
}

/// `GET /system/utc_clock`.
pub async fn get_utc_clock() -> Json<UtcClock> {
    Json(UtcClock { utc_clock: Utc::now().to_rfc3339() })
}

#[derive(Debug, Deserialize)]
pub struct SetUtcClockBody {
    pub utc_clock: String,
}

/// `PATCH|POST /system/utc_clock`. The leader may `sudo date -s` directly;
/// non-leader nodes step their clock via chrony instead of setting it
/// outright, since chrony otherwise fights the manual change back.
pub async fn set_utc_clock(
    State(state): State<UnitApiState>,
    Json(body): Json<SetUtcClockBody>,
) -> Result<impl IntoResponse, ApiError> {
    chrono::DateTime::parse_from_rfc3339(&body.utc_clock)
        .map_err(|e| ApiError::BadRequest(format!("invalid ISO-8601 timestamp: {e}")))?;

    let status = if state.is_leader {
        tokio::process::Command::new("sudo")
            .args(["date", "-s", &body.utc_clock])
            .status()
            .await
    } else {
        tokio::process::Command::new("sudo")
            .args(["chronyc", "-a", "makestep"])
            .status()
            .await
    };

    match status {
        Ok(status) if status.success() => Ok(StatusCode::OK),
        Ok(status) => Err(ApiError::Internal(anyhow::anyhow!("clock command exited with {status}"))),
        Err(err) => Err(ApiError::Internal(err.into())),
    }
}
