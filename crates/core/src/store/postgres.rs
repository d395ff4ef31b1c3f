//! PostgreSQL store.
//!
//! Transitions run inside one transaction. The revision update is guarded by
//! `WHERE id = $1 AND status = $expected`; zero affected rows means another
//! writer got there first and the whole transaction is rolled back.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::{
    CasResult, PageProjection, PageTransition, RevisionTransition, StoreResult, WorkflowStore,
};
use crate::audit::types::{
    ActivityEntry, NewActivity, NewPublicationEntry, NewReviewEvent, PublicationLogEntry,
    ReviewEvent,
};
use crate::content::model::{
    ContentBlock, NewRevision, Page, PageStatus, Revision, RevisionStatus, RevisionWorkflow, Site,
};
use crate::dispatch::webhook::{
    DeliveryOutcome, DeliveryStatus, NewWebhookDelivery, WebhookDelivery, WebhookEndpoint,
};
use crate::error::StoreError;

/// Column list for revisions queries.
const REVISION_COLUMNS: &str = "id, page_id, site_id, author_id, summary, meta, created_at, \
    status, scheduled_for, scheduled_timezone, scheduled_by_id, reviewed_at, reviewed_by_id, \
    published_at";

/// Column list for pages queries.
const PAGE_COLUMNS: &str = "id, site_id, path, title, status, published_at, meta, updated_at";

const PUBLICATION_COLUMNS: &str =
    "id, site_id, page_id, revision_id, actor_id, action, source, metadata, occurred_at";

const REVIEW_COLUMNS: &str =
    "id, site_id, page_id, revision_id, actor_id, event_type, note, created_at";

const ACTIVITY_COLUMNS: &str =
    "id, site_id, page_id, revision_id, actor_id, kind, data, created_at";

const DELIVERY_COLUMNS: &str = "id, webhook_id, event_type, payload, status, response_code, \
    error, attempts, created_at, completed_at";

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct SiteRow {
    id: Uuid,
    slug: String,
    name: String,
    timezone: String,
}

impl From<SiteRow> for Site {
    fn from(row: SiteRow) -> Self {
        Site {
            id: row.id,
            slug: row.slug,
            name: row.name,
            timezone: row.timezone,
        }
    }
}

#[derive(Debug, FromRow)]
struct PageRow {
    id: Uuid,
    site_id: Uuid,
    path: String,
    title: String,
    status: String,
    published_at: Option<DateTime<Utc>>,
    meta: Value,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PageRow> for Page {
    type Error = StoreError;

    fn try_from(row: PageRow) -> Result<Self, Self::Error> {
        Ok(Page {
            id: row.id,
            site_id: row.site_id,
            path: row.path,
            title: row.title,
            status: row.status.parse()?,
            published_at: row.published_at,
            meta: row.meta,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RevisionRow {
    id: Uuid,
    page_id: Uuid,
    site_id: Uuid,
    author_id: Option<Uuid>,
    summary: Option<String>,
    meta: Value,
    created_at: DateTime<Utc>,
    status: String,
    scheduled_for: Option<DateTime<Utc>>,
    scheduled_timezone: Option<String>,
    scheduled_by_id: Option<Uuid>,
    reviewed_at: Option<DateTime<Utc>>,
    reviewed_by_id: Option<Uuid>,
    published_at: Option<DateTime<Utc>>,
}

impl RevisionRow {
    fn into_revision(self, blocks: Vec<ContentBlock>) -> StoreResult<Revision> {
        Ok(Revision {
            id: self.id,
            page_id: self.page_id,
            site_id: self.site_id,
            author_id: self.author_id,
            summary: self.summary,
            meta: self.meta,
            created_at: self.created_at,
            workflow: RevisionWorkflow {
                status: self.status.parse()?,
                scheduled_for: self.scheduled_for,
                scheduled_timezone: self.scheduled_timezone,
                scheduled_by_id: self.scheduled_by_id,
                reviewed_at: self.reviewed_at,
                reviewed_by_id: self.reviewed_by_id,
                published_at: self.published_at,
            },
            blocks,
        })
    }
}

#[derive(Debug, FromRow)]
struct BlockRow {
    revision_id: Uuid,
    kind: String,
    sort_order: i32,
    data: Value,
    settings: Value,
}

#[derive(Debug, FromRow)]
struct PublicationRow {
    id: Uuid,
    site_id: Uuid,
    page_id: Uuid,
    revision_id: Option<Uuid>,
    actor_id: Option<Uuid>,
    action: String,
    source: String,
    metadata: Value,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<PublicationRow> for PublicationLogEntry {
    type Error = StoreError;

    fn try_from(row: PublicationRow) -> Result<Self, Self::Error> {
        Ok(PublicationLogEntry {
            id: row.id,
            site_id: row.site_id,
            page_id: row.page_id,
            revision_id: row.revision_id,
            actor_id: row.actor_id,
            action: row.action.parse()?,
            source: row.source.parse()?,
            metadata: row.metadata,
            occurred_at: row.occurred_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ReviewRow {
    id: Uuid,
    site_id: Uuid,
    page_id: Uuid,
    revision_id: Uuid,
    actor_id: Option<Uuid>,
    event_type: String,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReviewRow> for ReviewEvent {
    type Error = StoreError;

    fn try_from(row: ReviewRow) -> Result<Self, Self::Error> {
        Ok(ReviewEvent {
            id: row.id,
            site_id: row.site_id,
            page_id: row.page_id,
            revision_id: row.revision_id,
            actor_id: row.actor_id,
            event_type: row.event_type.parse()?,
            note: row.note,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct WebhookRow {
    id: Uuid,
    site_id: Uuid,
    url: String,
    secret: Option<String>,
    events: Vec<String>,
    active: bool,
}

impl From<WebhookRow> for WebhookEndpoint {
    fn from(row: WebhookRow) -> Self {
        WebhookEndpoint {
            id: row.id,
            site_id: row.site_id,
            url: row.url,
            secret: row.secret,
            events: row.events,
            active: row.active,
        }
    }
}

#[derive(Debug, FromRow)]
struct DeliveryRow {
    id: Uuid,
    webhook_id: Uuid,
    event_type: String,
    payload: Value,
    status: String,
    response_code: Option<i32>,
    error: Option<String>,
    attempts: i32,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<DeliveryRow> for WebhookDelivery {
    type Error = StoreError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        Ok(WebhookDelivery {
            id: row.id,
            webhook_id: row.webhook_id,
            event_type: row.event_type,
            payload: row.payload,
            status: row.status.parse()?,
            response_code: row.response_code,
            error: row.error,
            attempts: row.attempts,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Production [`WorkflowStore`] over a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Attach blocks to revision rows with one query.
    async fn with_blocks(&self, rows: Vec<RevisionRow>) -> StoreResult<Vec<Revision>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let blocks = sqlx::query_as::<_, BlockRow>(
            "SELECT revision_id, kind, sort_order, data, settings FROM content_blocks
             WHERE revision_id = ANY($1)
             ORDER BY revision_id, sort_order ASC",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<ContentBlock>> = HashMap::new();
        for block in blocks {
            grouped
                .entry(block.revision_id)
                .or_default()
                .push(ContentBlock {
                    kind: block.kind,
                    sort_order: block.sort_order,
                    data: block.data,
                    settings: block.settings,
                });
        }

        rows.into_iter()
            .map(|row| {
                let blocks = grouped.remove(&row.id).unwrap_or_default();
                row.into_revision(blocks)
            })
            .collect()
    }

    async fn one_with_blocks(&self, row: Option<RevisionRow>) -> StoreResult<Option<Revision>> {
        match row {
            Some(row) => Ok(self.with_blocks(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

async fn project_page(
    conn: &mut PgConnection,
    page_id: Uuid,
    projection: &PageProjection,
    at: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE pages
         SET status = $2,
             published_at = COALESCE($3, published_at),
             meta = COALESCE($4, meta),
             updated_at = $5
         WHERE id = $1",
    )
    .bind(page_id)
    .bind(projection.status.as_str())
    .bind(projection.published_at)
    .bind(&projection.meta)
    .bind(at)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

async fn insert_publication(
    conn: &mut PgConnection,
    site_id: Uuid,
    page_id: Uuid,
    entry: &NewPublicationEntry,
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO publication_log
            (id, site_id, page_id, revision_id, actor_id, action, source, metadata, occurred_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(Uuid::now_v7())
    .bind(site_id)
    .bind(page_id)
    .bind(entry.revision_id)
    .bind(entry.actor_id)
    .bind(entry.action.as_str())
    .bind(entry.source.as_str())
    .bind(&entry.metadata)
    .bind(at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_review_event(
    conn: &mut PgConnection,
    t: &RevisionTransition,
    review: &NewReviewEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO review_events
            (id, site_id, page_id, revision_id, actor_id, event_type, note, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(Uuid::now_v7())
    .bind(t.site_id)
    .bind(t.page_id)
    .bind(t.revision_id)
    .bind(review.actor_id)
    .bind(review.event_type.as_str())
    .bind(&review.note)
    .bind(t.at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_activity(
    conn: &mut PgConnection,
    t: &RevisionTransition,
    activity: &NewActivity,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO activity_events
            (id, site_id, page_id, revision_id, actor_id, kind, data, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(Uuid::now_v7())
    .bind(t.site_id)
    .bind(t.page_id)
    .bind(t.revision_id)
    .bind(activity.actor_id)
    .bind(&activity.kind)
    .bind(&activity.data)
    .bind(t.at)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_site(&self, id: Uuid) -> StoreResult<Option<Site>> {
        let row = sqlx::query_as::<_, SiteRow>(
            "SELECT id, slug, name, timezone FROM sites WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Site::from))
    }

    async fn get_page(&self, id: Uuid) -> StoreResult<Option<Page>> {
        let query = format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = $1");
        sqlx::query_as::<_, PageRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Page::try_from)
            .transpose()
    }

    async fn get_revision(&self, id: Uuid) -> StoreResult<Option<Revision>> {
        let query = format!("SELECT {REVISION_COLUMNS} FROM revisions WHERE id = $1");
        let row = sqlx::query_as::<_, RevisionRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.one_with_blocks(row).await
    }

    async fn create_revision(
        &self,
        page: &Page,
        input: &NewRevision,
        at: DateTime<Utc>,
    ) -> StoreResult<Revision> {
        let id = Uuid::now_v7();
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "INSERT INTO revisions (id, page_id, site_id, author_id, summary, meta, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {REVISION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RevisionRow>(&query)
            .bind(id)
            .bind(page.id)
            .bind(page.site_id)
            .bind(input.author_id)
            .bind(&input.summary)
            .bind(&input.meta)
            .bind(RevisionStatus::Draft.as_str())
            .bind(at)
            .fetch_one(&mut *tx)
            .await?;

        for block in &input.blocks {
            sqlx::query(
                "INSERT INTO content_blocks (id, revision_id, kind, sort_order, data, settings)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::now_v7())
            .bind(id)
            .bind(&block.kind)
            .bind(block.sort_order)
            .bind(&block.data)
            .bind(&block.settings)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        row.into_revision(input.blocks.clone())
    }

    async fn latest_published_revision(
        &self,
        page_id: Uuid,
        excluding: Uuid,
    ) -> StoreResult<Option<Revision>> {
        let query = format!(
            "SELECT {REVISION_COLUMNS} FROM revisions
             WHERE page_id = $1 AND id <> $2 AND status = 'PUBLISHED'
             ORDER BY published_at DESC NULLS LAST, id DESC
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, RevisionRow>(&query)
            .bind(page_id)
            .bind(excluding)
            .fetch_optional(&self.pool)
            .await?;
        self.one_with_blocks(row).await
    }

    async fn due_revisions(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Revision>> {
        let query = format!(
            "SELECT {REVISION_COLUMNS} FROM revisions
             WHERE status = 'SCHEDULED' AND scheduled_for <= $1
             ORDER BY scheduled_for ASC, id ASC
             LIMIT $2"
        );
        let rows = sqlx::query_as::<_, RevisionRow>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        self.with_blocks(rows).await
    }

    async fn due_revision_for_page(
        &self,
        page_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Revision>> {
        let query = format!(
            "SELECT {REVISION_COLUMNS} FROM revisions
             WHERE page_id = $1 AND status = 'SCHEDULED' AND scheduled_for <= $2
             ORDER BY scheduled_for ASC, id ASC
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, RevisionRow>(&query)
            .bind(page_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        self.one_with_blocks(row).await
    }

    async fn apply_revision_transition(
        &self,
        t: &RevisionTransition,
    ) -> StoreResult<CasResult<RevisionStatus>> {
        let mut tx = self.pool.begin().await?;
        let w = &t.workflow;

        let updated = sqlx::query(
            "UPDATE revisions
             SET status = $4,
                 scheduled_for = $5,
                 scheduled_timezone = $6,
                 scheduled_by_id = $7,
                 reviewed_at = $8,
                 reviewed_by_id = $9,
                 published_at = $10
             WHERE id = $1 AND page_id = $2 AND status = $3",
        )
        .bind(t.revision_id)
        .bind(t.page_id)
        .bind(t.expected.as_str())
        .bind(w.status.as_str())
        .bind(w.scheduled_for)
        .bind(&w.scheduled_timezone)
        .bind(w.scheduled_by_id)
        .bind(w.reviewed_at)
        .bind(w.reviewed_by_id)
        .bind(w.published_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let actual: Option<String> = sqlx::query_scalar(
                "SELECT status FROM revisions WHERE id = $1 AND page_id = $2",
            )
            .bind(t.revision_id)
            .bind(t.page_id)
            .fetch_optional(&mut *tx)
            .await?;
            tx.rollback().await?;
            return match actual {
                Some(status) => Ok(CasResult::StateMismatch {
                    actual: status.parse()?,
                }),
                None => Ok(CasResult::NotFound),
            };
        }

        if project_page(&mut *tx, t.page_id, &t.page, t.at).await? == 0 {
            tx.rollback().await?;
            return Ok(CasResult::NotFound);
        }
        if let Some(entry) = &t.publication {
            insert_publication(&mut *tx, t.site_id, t.page_id, entry, t.at).await?;
        }
        if let Some(review) = &t.review {
            insert_review_event(&mut *tx, t, review).await?;
        }
        if let Some(activity) = &t.activity {
            insert_activity(&mut *tx, t, activity).await?;
        }

        tx.commit().await?;
        Ok(CasResult::Success)
    }

    async fn apply_page_transition(
        &self,
        t: &PageTransition,
    ) -> StoreResult<CasResult<PageStatus>> {
        let mut tx = self.pool.begin().await?;

        let actual: Option<String> =
            sqlx::query_scalar("SELECT status FROM pages WHERE id = $1 FOR UPDATE")
                .bind(t.page_id)
                .fetch_optional(&mut *tx)
                .await?;
        let actual: PageStatus = match actual {
            Some(status) => status.parse()?,
            None => {
                tx.rollback().await?;
                return Ok(CasResult::NotFound);
            }
        };
        if actual != t.expected {
            tx.rollback().await?;
            return Ok(CasResult::StateMismatch { actual });
        }

        project_page(&mut *tx, t.page_id, &t.page, t.at).await?;
        if let Some(entry) = &t.publication {
            insert_publication(&mut *tx, t.site_id, t.page_id, entry, t.at).await?;
        }

        tx.commit().await?;
        Ok(CasResult::Success)
    }

    async fn list_publication_log(
        &self,
        page_id: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<PublicationLogEntry>> {
        let query = format!(
            "SELECT {PUBLICATION_COLUMNS} FROM publication_log
             WHERE page_id = $1
             ORDER BY occurred_at DESC, id DESC
             LIMIT $2"
        );
        sqlx::query_as::<_, PublicationRow>(&query)
            .bind(page_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(PublicationLogEntry::try_from)
            .collect()
    }

    async fn list_review_events(
        &self,
        page_id: Uuid,
        revision_id: Option<Uuid>,
        limit: i64,
    ) -> StoreResult<Vec<ReviewEvent>> {
        let query = format!(
            "SELECT {REVIEW_COLUMNS} FROM review_events
             WHERE page_id = $1 AND ($2::uuid IS NULL OR revision_id = $2)
             ORDER BY created_at DESC, id DESC
             LIMIT $3"
        );
        sqlx::query_as::<_, ReviewRow>(&query)
            .bind(page_id)
            .bind(revision_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ReviewEvent::try_from)
            .collect()
    }

    async fn list_activity(&self, page_id: Uuid, limit: i64) -> StoreResult<Vec<ActivityEntry>> {
        let query = format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activity_events
             WHERE page_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2"
        );
        Ok(sqlx::query_as::<_, ActivityEntry>(&query)
            .bind(page_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn webhooks_for_event(
        &self,
        site_id: Uuid,
        event_type: &str,
    ) -> StoreResult<Vec<WebhookEndpoint>> {
        let rows = sqlx::query_as::<_, WebhookRow>(
            "SELECT id, site_id, url, secret, events, active FROM webhooks
             WHERE site_id = $1 AND active
               AND (cardinality(events) = 0 OR $2 = ANY(events))
             ORDER BY created_at ASC",
        )
        .bind(site_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(WebhookEndpoint::from).collect())
    }

    async fn begin_webhook_delivery(
        &self,
        delivery: &NewWebhookDelivery,
        at: DateTime<Utc>,
    ) -> StoreResult<WebhookDelivery> {
        let query = format!(
            "INSERT INTO webhook_deliveries (id, webhook_id, event_type, payload, status, attempts, created_at)
             VALUES ($1, $2, $3, $4, $5, 0, $6)
             RETURNING {DELIVERY_COLUMNS}"
        );
        sqlx::query_as::<_, DeliveryRow>(&query)
            .bind(Uuid::now_v7())
            .bind(delivery.webhook_id)
            .bind(&delivery.event_type)
            .bind(&delivery.payload)
            .bind(DeliveryStatus::Pending.as_str())
            .bind(at)
            .fetch_one(&self.pool)
            .await?
            .try_into()
    }

    async fn complete_webhook_delivery(
        &self,
        id: Uuid,
        outcome: &DeliveryOutcome,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE webhook_deliveries
             SET status = $2, response_code = $3, error = $4, attempts = $5, completed_at = $6
             WHERE id = $1",
        )
        .bind(id)
        .bind(outcome.status.as_str())
        .bind(outcome.response_code.map(i32::from))
        .bind(&outcome.error)
        .bind(i32::try_from(outcome.attempts).unwrap_or(i32::MAX))
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
