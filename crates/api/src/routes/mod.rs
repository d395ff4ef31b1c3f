pub mod cron;
pub mod health;
pub mod pages;
pub mod revisions;

use axum::extract::rejection::JsonRejection;
use axum::{Json, Router};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Assemble the full router with all route groups.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(pages::routes())
        .merge(revisions::routes())
        .merge(cron::routes())
        .with_state(state)
}

/// Unwrap a JSON body, reporting malformed input in the API's error shape.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Reject non-positive list limits.
pub(crate) fn check_limit(limit: Option<i64>) -> ApiResult<Option<i64>> {
    match limit {
        Some(n) if n < 1 => Err(ApiError::BadRequest(format!(
            "limit must be positive, got {n}"
        ))),
        other => Ok(other),
    }
}
