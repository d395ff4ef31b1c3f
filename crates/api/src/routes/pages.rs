use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{check_limit, json_body};
use crate::error::ApiResult;
use crate::state::AppState;

/// Page delivery, unpublish and audit trail reads.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/pages/{page_id}", get(view_page))
        .route("/v1/pages/{page_id}/unpublish", post(unpublish))
        .route("/v1/pages/{page_id}/publication-log", get(publication_log))
        .route("/v1/pages/{page_id}/review-events", get(review_events))
        .route("/v1/pages/{page_id}/activity", get(activity))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnpublishRequest {
    pub actor_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub revision_id: Option<Uuid>,
}

/// Serve a page, releasing any due scheduled revision first.
async fn view_page(
    State(state): State<AppState>,
    Path(page_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let page = state.workflow().view_page(page_id).await?;
    Ok(Json(json!({ "success": true, "page": page })))
}

async fn unpublish(
    State(state): State<AppState>,
    Path(page_id): Path<Uuid>,
    body: Result<Json<UnpublishRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = json_body(body)?;
    let page = state.workflow().unpublish(page_id, request.actor_id).await?;
    Ok(Json(json!({ "success": true, "page": page })))
}

async fn publication_log(
    State(state): State<AppState>,
    Path(page_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let limit = check_limit(query.limit)?;
    let entries = state.workflow().list_publication_log(page_id, limit).await?;
    Ok(Json(json!({ "success": true, "entries": entries })))
}

async fn review_events(
    State(state): State<AppState>,
    Path(page_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let limit = check_limit(query.limit)?;
    let events = state
        .workflow()
        .list_review_events(page_id, query.revision_id, limit)
        .await?;
    Ok(Json(json!({ "success": true, "events": events })))
}

async fn activity(
    State(state): State<AppState>,
    Path(page_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let limit = check_limit(query.limit)?;
    let entries = state.workflow().list_activity(page_id, limit).await?;
    Ok(Json(json!({ "success": true, "entries": entries })))
}
