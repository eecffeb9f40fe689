use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use pio_unit_api::{router, UnitApiState};

async fn test_state(tmp: &tempfile::TempDir) -> UnitApiState {
    let tasks = Arc::new(pio_taskengine::TaskEngine::open_in_memory(Some(2)).await.unwrap());
    UnitApiState::open(
        tmp.path().join("metadata.sqlite"),
        tasks,
        tmp.path().join("root"),
        false,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn jobs_running_starts_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(test_state(&tmp).await);

    let req = Request::builder()
        .method("GET")
        .uri("/unit_api/jobs/running")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, serde_json::json!([]));
}

#[tokio::test]
async fn run_job_twice_within_a_second_is_conflict() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(test_state(&tmp).await);

    let run_req = || {
        Request::builder()
            .method("POST")
            .uri("/unit_api/jobs/run/job_name/stirring")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap()
    };

    let first = app.clone().oneshot(run_req()).await.unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = app.oneshot(run_req()).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn remove_file_rejects_paths_outside_the_whitelist() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(test_state(&tmp).await);

    let req = Request::builder()
        .method("POST")
        .uri("/unit_api/system/remove_file")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"filepath":"/etc/passwd"}"#))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn remove_file_allows_tmp_paths() {
    let tmp = tempfile::tempdir().unwrap();
    let target = tmp.path().join("scratch.txt");
    tokio::fs::write(&target, b"x").await.unwrap();
    let app = router(test_state(&tmp).await);

    let req = Request::builder()
        .method("POST")
        .uri("/unit_api/system/remove_file")
        .header("content-type", "application/json")
        .body(Body::from(format!(r#"{{"filepath":"/tmp{}"}}"#, "/does-not-matter")))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    // The path is under /tmp (whitelist passes) even though the file itself
    // doesn't exist, so this should fail with 404, not 400.
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let _ = target;
}

#[tokio::test]
async fn task_results_unknown_id_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(test_state(&tmp).await);

    let req = Request::builder()
        .method("GET")
        .uri("/unit_api/task_results/does-not-exist")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_job_setting_is_unimplemented() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(test_state(&tmp).await);

    let req = Request::builder()
        .method("PATCH")
        .uri("/unit_api/jobs/settings/job_name/stirring")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn calibrations_round_trip_save_activate_delete() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(test_state(&tmp).await);

    let save = Request::builder()
        .method("POST")
        .uri("/unit_api/calibrations/ph/seed-1")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"yaml":"device: ph\ncalibration_name: seed-1\n"}"#))
        .unwrap();
    let response = app.clone().oneshot(save).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let activate = Request::builder()
        .method("PATCH")
        .uri("/unit_api/calibrations/ph/seed-1/active")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(activate).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let delete = Request::builder()
        .method("DELETE")
        .uri("/unit_api/calibrations/ph/seed-1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
