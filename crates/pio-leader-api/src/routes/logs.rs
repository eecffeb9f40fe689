//! `POST /api/logs` — UI-originated log envelope: persisted to the `logs`
//! table and, when a Bus is configured, republished for any worker UI
//! subscribed to the experiment's log topic. See spec.md §10.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use pio_types::log::{LogEntry, UiLogEnvelope};
use pio_types::UNIVERSAL_EXPERIMENT;
use rumqttc::QoS;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::LeaderState;

#[derive(Debug, Deserialize)]
pub struct CreateLogRequest {
    #[serde(flatten)]
    pub envelope: UiLogEnvelope,
    #[serde(default)]
    pub experiment: Option<String>,
    pub pioreactor_unit: String,
}

pub async fn create_log(
    State(state): State<LeaderState>,
    Json(body): Json<CreateLogRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let experiment = body.experiment.unwrap_or_else(|| UNIVERSAL_EXPERIMENT.to_string());
    let entry = LogEntry {
        timestamp: Utc::now(),
        level: body.envelope.level,
        pioreactor_unit: body.pioreactor_unit.clone(),
        message: body.envelope.message.clone(),
        task: body.envelope.task.clone(),
        experiment: experiment.clone(),
    };
    state.store.insert_log(&entry).await?;

    if let Some(bus) = &state.bus {
        let topic = format!(
            "pioreactor/{}/{experiment}/logs/ui/{}",
            body.pioreactor_unit,
            serde_json::to_value(body.envelope.level)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "INFO".to_string())
                .to_lowercase(),
        );
        let payload = serde_json::to_vec(&entry).unwrap_or_default();
        let _ = bus.publish(topic, payload, QoS::AtMostOnce, false).await;
    }

    Ok(StatusCode::CREATED)
}
