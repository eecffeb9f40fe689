//! HTTP façade exposed by every node (leader included) for the operations
//! the leader's Fanout targets: job lifecycle, plugins, calibrations,
//! system/power, and task-result polling. See spec.md §4.8.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use state::UnitApiState;

use axum::middleware as axum_middleware;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use pio_telemetry::middleware::metrics_middleware;
use pio_telemetry::tracing_setup::request_id_middleware;

use routes::{calibrations, jobs, plugins, system, task_results, versions};

/// Build the full `/unit_api` router.
pub fn router(state: UnitApiState) -> Router {
    Router::new()
        // system
        .route("/unit_api/system/reboot", post(system::reboot))
        .route("/unit_api/system/shutdown", post(system::shutdown))
        .route("/unit_api/system/remove_file", post(system::remove_file))
        .route(
            "/unit_api/system/utc_clock",
            get(system::get_utc_clock)
                .patch(system::set_utc_clock)
                .post(system::set_utc_clock),
        )
        // jobs
        .route("/unit_api/jobs/run/job_name/{job}", post(jobs::run_job))
        .route("/unit_api/jobs/stop", post(jobs::stop_job))
        .route("/unit_api/jobs/stop/all", post(jobs::stop_all_jobs))
        .route(
            "/unit_api/jobs/stop/job_name/{job}",
            post(jobs::stop_job_by_name),
        )
        .route(
            "/unit_api/jobs/stop/experiment/{experiment}",
            post(jobs::stop_job_by_experiment),
        )
        .route("/unit_api/jobs/running", get(jobs::list_running_jobs))
        .route(
            "/unit_api/jobs/settings/job_name/{job}",
            get(jobs::get_job_settings).patch(jobs::update_job_setting),
        )
        .route(
            "/unit_api/jobs/settings/job_name/{job}/setting/{setting}",
            get(jobs::get_job_setting).patch(jobs::update_job_setting),
        )
        // plugins
        .route("/unit_api/plugins/installed", get(plugins::list_installed))
        .route(
            "/unit_api/plugins/installed/{file}",
            get(plugins::get_installed),
        )
        .route("/unit_api/plugins/install", post(plugins::install))
        .route("/unit_api/plugins/uninstall", post(plugins::uninstall))
        // versions
        .route("/unit_api/versions/app", get(versions::app_version))
        .route("/unit_api/versions/ui", get(versions::ui_version))
        // calibrations
        .route("/unit_api/calibrations", get(calibrations::list_all))
        .route(
            "/unit_api/calibrations/{device}",
            get(calibrations::list_for_device),
        )
        .route(
            "/unit_api/calibrations/{device}/{name}",
            get(calibrations::get_calibration)
                .post(calibrations::save_calibration)
                .delete(calibrations::delete_calibration),
        )
        .route(
            "/unit_api/calibrations/{device}/{name}/active",
            patch(calibrations::set_active),
        )
        .route(
            "/unit_api/calibrations/{device}/active",
            delete(calibrations::delete_active),
        )
        // task results
        .route(
            "/unit_api/task_results/{id}",
            get(task_results::get_task_result),
        )
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
