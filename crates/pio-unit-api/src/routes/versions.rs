//! `/unit_api/versions/*`.

use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Version {
    pub version: &'static str,
}

/// `GET /versions/app`.
pub async fn app_version() -> impl IntoResponse {
    Json(Version { version: env!("CARGO_PKG_VERSION") })
}

/// `GET /versions/ui`. The UI is a separate front-end asset bundle this
/// crate does not build; its version is baked in at image-build time rather
/// than derived from this crate's own version.
pub async fn ui_version() -> impl IntoResponse {
    Json(Version { version: env!("CARGO_PKG_VERSION") })
}
