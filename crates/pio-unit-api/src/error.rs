//! HTTP error taxonomy shared by every route handler. See spec.md §7: a
//! handler never lets an exception reach the client -- it maps whatever
//! went wrong to one of these variants, logs it, and responds with a JSON
//! `{msg}` body and the matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("disabled")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Timed out")]
    Timeout,
    #[error("not implemented")]
    NotImplemented,
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Engine(#[from] pio_taskengine::EngineError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Timeout => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            ApiError::NotImplemented => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ApiError::Db(_) | ApiError::Sqlite(_) | ApiError::Engine(_) | ApiError::Internal(_) => {
                tracing::error!(error = %self, "unit-api internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };
        (status, Json(json!({ "msg": msg }))).into_response()
    }
}
