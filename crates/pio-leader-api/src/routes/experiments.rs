//! `/api/experiments` — CRUD, latest, per-experiment workers/logs/labels.
//! See spec.md §4.7 "Experiments & assignments".

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use pio_store::experiments::WriteResult as ExperimentWriteResult;
use pio_store::logs::LogFilter;
use pio_store::timeseries::TimeSeriesQuery as StoreTimeSeriesQuery;
use pio_types::validate_experiment_name;
use pio_workerrpc::Verb;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::LeaderState;

const LIST_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct CreateExperimentRequest {
    pub experiment: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub media_used: Option<String>,
    #[serde(default)]
    pub organism_used: Option<String>,
}

pub async fn create_experiment(
    State(state): State<LeaderState>,
    Json(body): Json<CreateExperimentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_experiment_name(&body.experiment).map_err(ApiError::BadRequest)?;

    let outcome = state
        .store
        .create_experiment(&body.experiment, body.description, body.media_used, body.organism_used)
        .await?;

    match outcome {
        ExperimentWriteResult::Created => {
            tracing::info!(experiment = %body.experiment, "experiment created");
            state.cache.evict_tag("experiments");
            state.cache.evict_tag("unit_labels");
            Ok((StatusCode::CREATED, Json(serde_json::json!({ "experiment": body.experiment }))))
        }
        ExperimentWriteResult::AlreadyExists => {
            Err(ApiError::Conflict(format!("experiment `{}` already exists", body.experiment)))
        }
        ExperimentWriteResult::NotFound => unreachable!("create never returns NotFound"),
    }
}

pub async fn list_experiments(State(state): State<LeaderState>) -> Result<impl IntoResponse, ApiError> {
    let key = "experiments:list";
    let value = state
        .cache
        .memoize(key, "experiments", LIST_CACHE_TTL, || async {
            let experiments = state.store.list_experiments().await.unwrap_or_default();
            serde_json::to_value(experiments).unwrap_or(serde_json::Value::Null)
        })
        .await;
    Ok(Json(value))
}

pub async fn latest_experiment(State(state): State<LeaderState>) -> Result<impl IntoResponse, ApiError> {
    match state.store.latest_experiment().await? {
        Some(experiment) => Ok(Json(experiment)),
        None => Err(ApiError::NotFound("no experiments exist yet".into())),
    }
}

pub async fn get_experiment(
    State(state): State<LeaderState>,
    Path(experiment): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.store.get_experiment(&experiment).await? {
        Some(experiment) => Ok(Json(experiment)),
        None => Err(ApiError::NotFound(format!("experiment `{experiment}` not found"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateExperimentRequest {
    pub description: String,
}

pub async fn update_experiment(
    State(state): State<LeaderState>,
    Path(experiment): Path<String>,
    Json(body): Json<UpdateExperimentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    match state.store.update_experiment_description(&experiment, body.description).await? {
        ExperimentWriteResult::Created => {
            state.cache.evict_tag("experiments");
            Ok(StatusCode::OK)
        }
        _ => Err(ApiError::NotFound(format!("experiment `{experiment}` not found"))),
    }
}

/// Deletes the experiment (cascading to assignments/labels via FK), then
/// fans out a stop-all-jobs-for-this-experiment call to every worker that
/// was assigned to it.
pub async fn delete_experiment(
    State(state): State<LeaderState>,
    Path(experiment): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let assigned = state.store.list_assignments_for_experiment(&experiment).await?;

    match state.store.delete_experiment(&experiment).await? {
        ExperimentWriteResult::Created => {
            state.cache.evict_tag("experiments");
            state.cache.evict_tag("unit_labels");

            let units: Vec<String> = assigned.into_iter().map(|a| a.pioreactor_unit).collect();
            if !units.is_empty() {
                let endpoint = format!("/unit_api/jobs/stop/experiment/{experiment}");
                let rpc = state.rpc.clone();
                tokio::spawn(async move {
                    pio_fanout::fanout(&rpc, Verb::Post, &endpoint, &units, None, None).await;
                });
            }
            Ok(StatusCode::OK)
        }
        _ => Err(ApiError::NotFound(format!("experiment `{experiment}` not found"))),
    }
}

pub async fn experiment_workers(
    State(state): State<LeaderState>,
    Path(experiment): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_assignments_for_experiment(&experiment).await?))
}

#[derive(Debug, Deserialize, Default)]
pub struct LogsQuery {
    pub pioreactor_unit: Option<String>,
    pub limit: Option<u32>,
}

pub async fn experiment_logs(
    State(state): State<LeaderState>,
    Path(experiment): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .store
        .list_logs(LogFilter {
            experiment: Some(experiment),
            pioreactor_unit: query.pioreactor_unit,
            min_level: None,
            limit: query.limit.unwrap_or(0),
        })
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct SetLabelRequest {
    pub label: String,
}

pub async fn list_unit_labels(
    State(state): State<LeaderState>,
    Path(experiment): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_labels(&experiment).await?))
}

pub async fn set_unit_label(
    State(state): State<LeaderState>,
    Path((experiment, pioreactor_unit)): Path<(String, String)>,
    Json(body): Json<SetLabelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.set_label(&experiment, &pioreactor_unit, &body.label).await?;
    state.cache.evict_tag("unit_labels");
    Ok(StatusCode::OK)
}

pub async fn remove_unit_label(
    State(state): State<LeaderState>,
    Path((experiment, pioreactor_unit)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.remove_label(&experiment, &pioreactor_unit).await?;
    state.cache.evict_tag("unit_labels");
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize, Default)]
pub struct TimeSeriesQueryParams {
    #[serde(rename = "filter_mod_N")]
    pub filter_mod_n: Option<f64>,
    pub lookback: Option<f64>,
}

impl TimeSeriesQueryParams {
    fn into_store_query(self, round_places: i32) -> StoreTimeSeriesQuery {
        StoreTimeSeriesQuery {
            filter_mod_n: self.filter_mod_n.unwrap_or(100.0),
            lookback_hours: self.lookback.unwrap_or(4.0),
            round_places,
        }
    }
}

pub async fn growth_rates(
    State(state): State<LeaderState>,
    Path(experiment): Path<String>,
    Query(params): Query<TimeSeriesQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.into_store_query(5);
    Ok(Json(state.store.query_time_series("growth_rates", "rate", &experiment, query).await?))
}

pub async fn temperature_readings(
    State(state): State<LeaderState>,
    Path(experiment): Path<String>,
    Query(params): Query<TimeSeriesQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.into_store_query(2);
    Ok(Json(state.store.query_time_series("temperature_readings", "temperature_c", &experiment, query).await?))
}

pub async fn od_readings_filtered(
    State(state): State<LeaderState>,
    Path(experiment): Path<String>,
    Query(params): Query<TimeSeriesQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.into_store_query(7);
    Ok(Json(state.store.query_time_series("od_readings_filtered", "normalized_od_reading", &experiment, query).await?))
}

pub async fn od_readings(
    State(state): State<LeaderState>,
    Path(experiment): Path<String>,
    Query(params): Query<TimeSeriesQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.into_store_query(7);
    Ok(Json(state.store.query_time_series("od_readings", "od_reading", &experiment, query).await?))
}

/// Fallback time-series endpoint for any `(data_source, column)` pair not
/// covered by a dedicated route above.
pub async fn fallback_time_series(
    State(state): State<LeaderState>,
    Path((experiment, data_source, column)): Path<(String, String, String)>,
    Query(params): Query<TimeSeriesQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.into_store_query(7);
    Ok(Json(state.store.query_time_series(&data_source, &column, &experiment, query).await?))
}

pub async fn media_rates(
    State(state): State<LeaderState>,
    Path(experiment): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.media_rates(&experiment).await?))
}
