use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use axum::routing::post;
use axum::{Json, Router};
use folio_core::audit::types::PublicationSource;
use folio_core::scheduler::run_scheduled_publications;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Externally triggered scheduler sweep.
pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/cron/publish-scheduled", post(publish_scheduled))
}

/// Check `Authorization: Bearer <secret>` in constant time.
fn authorize(headers: &HeaderMap, secret: Option<&str>) -> ApiResult<()> {
    let Some(secret) = secret else {
        return Err(ApiError::Unavailable(
            "scheduled publishing endpoint is not configured".to_string(),
        ));
    };
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    if bool::from(provided.as_bytes().ct_eq(secret.as_bytes())) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

async fn publish_scheduled(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    authorize(&headers, state.config().cron_secret.as_deref())?;

    let report = run_scheduled_publications(
        state.workflow(),
        state.config().scheduler_batch_limit,
        PublicationSource::Scheduler,
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "published": report.published_count(),
        "failed": report.failed,
        "revisionIds": report.published,
    })))
}
