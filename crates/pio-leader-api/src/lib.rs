//! HTTP façade for the leader node: composes `Store`, `Cache`, `Bus`,
//! `WorkerRpc`/`Fanout`, and `TaskEngine` into the cluster-coordination API
//! at `/api`. See spec.md §4.7.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use state::LeaderState;

use axum::middleware as axum_middleware;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use pio_telemetry::middleware::metrics_middleware;
use pio_telemetry::tracing_setup::request_id_middleware;

use routes::{calibrations, configs, contrib, experiments, exports, jobs, logs, system, workers};

/// Build the full `/api` router.
pub fn router(state: LeaderState) -> Router {
    Router::new()
        // experiments
        .route("/api/experiments", post(experiments::create_experiment).get(experiments::list_experiments))
        .route("/api/experiments/latest", get(experiments::latest_experiment))
        .route(
            "/api/experiments/{experiment}",
            get(experiments::get_experiment)
                .patch(experiments::update_experiment)
                .delete(experiments::delete_experiment),
        )
        .route("/api/experiments/{experiment}/workers", get(experiments::experiment_workers))
        .route("/api/experiments/{experiment}/logs", get(experiments::experiment_logs))
        .route("/api/experiments/{experiment}/unit_labels", get(experiments::list_unit_labels))
        .route("/api/logs", post(logs::create_log))
        // time series & media rates
        .route("/api/experiments/{experiment}/time_series/growth_rates", get(experiments::growth_rates))
        .route(
            "/api/experiments/{experiment}/time_series/temperature_readings",
            get(experiments::temperature_readings),
        )
        .route(
            "/api/experiments/{experiment}/time_series/od_readings_filtered",
            get(experiments::od_readings_filtered),
        )
        .route("/api/experiments/{experiment}/time_series/od_readings", get(experiments::od_readings))
        .route(
            "/api/experiments/{experiment}/time_series/{data_source}/{column}",
            get(experiments::fallback_time_series),
        )
        .route("/api/experiments/{experiment}/media_rates", get(experiments::media_rates))
        .route(
            "/api/experiments/{experiment}/unit_labels/{pioreactor_unit}",
            put(experiments::set_unit_label).delete(experiments::remove_unit_label),
        )
        // workers
        .route("/api/workers", put(workers::upsert_worker).get(workers::list_workers))
        .route(
            "/api/workers/{pioreactor_unit}",
            get(workers::get_worker).delete(workers::remove_worker),
        )
        .route("/api/workers/{pioreactor_unit}/is_active", put(workers::set_worker_active))
        .route(
            "/api/workers/{pioreactor_unit}/experiment",
            get(workers::get_worker_experiment)
                .put(workers::assign_worker)
                .delete(workers::unassign_worker),
        )
        .route("/api/workers/{pioreactor_unit}/setup", post(workers::setup_worker))
        // job control
        .route(
            "/api/workers/{pioreactor_unit}/jobs/run/job_name/{job}/experiments/{experiment}",
            post(jobs::run_job),
        )
        .route(
            "/api/workers/{pioreactor_unit}/jobs/stop/job_name/{job}/experiments/{experiment}",
            post(jobs::stop_job),
        )
        .route(
            "/api/workers/{pioreactor_unit}/jobs/update/job_name/{job}/experiments/{experiment}",
            patch(jobs::update_job_settings),
        )
        // configs
        .route("/api/configs", get(configs::list_configs))
        .route(
            "/api/configs/{filename}",
            get(configs::get_config).patch(configs::write_config),
        )
        .route("/api/configs/{filename}/history", get(configs::config_history))
        // contrib registries
        .route(
            "/api/contrib/{category}",
            get(contrib::list_entries).post(contrib::create_entry),
        )
        .route(
            "/api/contrib/{category}/{name}",
            get(contrib::get_entry)
                .patch(contrib::update_entry)
                .delete(contrib::delete_entry),
        )
        // calibrations (fanned out)
        .route("/api/workers/{pioreactor_unit}/calibrations", get(calibrations::list_calibrations))
        .route(
            "/api/workers/{pioreactor_unit}/calibrations/{device}",
            get(calibrations::list_calibrations_for_device),
        )
        .route(
            "/api/workers/{pioreactor_unit}/calibrations/{device}/active",
            delete(calibrations::delete_active),
        )
        .route(
            "/api/workers/{pioreactor_unit}/calibrations/{device}/{name}/active",
            patch(calibrations::set_active),
        )
        .route(
            "/api/workers/{pioreactor_unit}/calibrations/{device}/{name}",
            delete(calibrations::delete_calibration),
        )
        // exports
        .route("/api/export_datasets", post(exports::export_datasets))
        // system
        .route("/api/system/upload", post(system::upload))
        .route("/api/system/path/{*path}", get(system::browse))
        .route("/api/system/update_next_version", post(system::update_next_version))
        .route("/api/system/update_from_archive", post(system::update_from_archive))
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
