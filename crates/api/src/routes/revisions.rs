use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use folio_core::content::model::{NewRevision, Revision};
use folio_core::revision::ActionContext;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::json_body;
use crate::error::ApiResult;
use crate::state::AppState;

/// Revision authoring, workflow actions and diff.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/pages/{page_id}/revisions", post(create_revision))
        .route("/v1/pages/{page_id}/revisions/{revision_id}/submit", post(submit))
        .route("/v1/pages/{page_id}/revisions/{revision_id}/approve", post(approve))
        .route(
            "/v1/pages/{page_id}/revisions/{revision_id}/request-changes",
            post(request_changes),
        )
        .route("/v1/pages/{page_id}/revisions/{revision_id}/schedule", post(schedule))
        .route(
            "/v1/pages/{page_id}/revisions/{revision_id}/cancel-schedule",
            post(cancel_schedule),
        )
        .route("/v1/pages/{page_id}/revisions/{revision_id}/publish", post(publish))
        .route("/v1/revisions/{revision_id}/diff", get(diff))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionRequest {
    pub actor_id: Option<Uuid>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    #[serde(default)]
    pub actor_id: Option<Uuid>,
    #[serde(default)]
    pub note: Option<String>,
    /// Local wall-clock time, e.g. `2030-02-01T09:00`.
    pub scheduled_at: String,
    /// IANA zone; the site's zone when absent.
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DiffQuery {
    pub against: Option<Uuid>,
}

type Ids = Path<(Uuid, Uuid)>;

fn context(
    (page_id, revision_id): (Uuid, Uuid),
    actor_id: Option<Uuid>,
    note: Option<String>,
) -> ActionContext {
    ActionContext {
        page_id,
        revision_id,
        actor_id,
        note,
    }
}

fn action_context(
    ids: (Uuid, Uuid),
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> ApiResult<ActionContext> {
    let request = json_body(body)?;
    Ok(context(ids, request.actor_id, request.note))
}

fn succeeded(revision: Revision) -> Json<Value> {
    Json(json!({ "success": true, "revision": revision }))
}

async fn create_revision(
    State(state): State<AppState>,
    Path(page_id): Path<Uuid>,
    body: Result<Json<NewRevision>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let input = json_body(body)?;
    let revision = state.workflow().create_revision(page_id, input).await?;
    Ok((StatusCode::CREATED, succeeded(revision)))
}

async fn submit(
    State(state): State<AppState>,
    Path(ids): Ids,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let ctx = action_context(ids, body)?;
    Ok(succeeded(state.workflow().submit_for_review(&ctx).await?))
}

async fn approve(
    State(state): State<AppState>,
    Path(ids): Ids,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let ctx = action_context(ids, body)?;
    Ok(succeeded(state.workflow().approve(&ctx).await?))
}

async fn request_changes(
    State(state): State<AppState>,
    Path(ids): Ids,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let ctx = action_context(ids, body)?;
    Ok(succeeded(state.workflow().request_changes(&ctx).await?))
}

async fn schedule(
    State(state): State<AppState>,
    Path(ids): Ids,
    body: Result<Json<ScheduleRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = json_body(body)?;
    let ctx = context(ids, request.actor_id, request.note);
    let revision = state
        .workflow()
        .schedule(&ctx, &request.scheduled_at, request.timezone.as_deref())
        .await?;
    Ok(succeeded(revision))
}

async fn cancel_schedule(
    State(state): State<AppState>,
    Path(ids): Ids,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let ctx = action_context(ids, body)?;
    Ok(succeeded(state.workflow().cancel_schedule(&ctx).await?))
}

async fn publish(
    State(state): State<AppState>,
    Path(ids): Ids,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let ctx = action_context(ids, body)?;
    Ok(succeeded(state.workflow().publish_now(&ctx).await?))
}

async fn diff(
    State(state): State<AppState>,
    Path(revision_id): Path<Uuid>,
    Query(query): Query<DiffQuery>,
) -> ApiResult<Json<Value>> {
    let diff = state.workflow().diff(revision_id, query.against).await?;
    Ok(Json(json!({ "success": true, "diff": diff })))
}
