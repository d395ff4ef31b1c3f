//! Persistence for pages, revisions and their audit trail.
//!
//! Every transition is applied through a compare-and-swap on the expected
//! status: the revision update, the page projection and the audit entries
//! either all land or none do. A lost race surfaces as
//! [`CasResult::StateMismatch`] instead of silently overwriting.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::audit::types::{
    ActivityEntry, NewActivity, NewPublicationEntry, NewReviewEvent, PublicationLogEntry,
    ReviewEvent,
};
use crate::content::model::{
    NewRevision, Page, PageStatus, Revision, RevisionStatus, RevisionWorkflow, Site,
};
use crate::dispatch::webhook::{DeliveryOutcome, NewWebhookDelivery, WebhookDelivery, WebhookEndpoint};
use crate::error::StoreError;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a compare-and-swap write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult<S> {
    Success,
    NotFound,
    /// The row was not in the expected state; nothing was written.
    StateMismatch { actual: S },
}

impl<S> CasResult<S> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Page columns rewritten alongside a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct PageProjection {
    pub status: PageStatus,
    /// Overwrites `published_at` when set; otherwise the column is left alone.
    pub published_at: Option<DateTime<Utc>>,
    /// Overwrites the page metadata when set.
    pub meta: Option<Value>,
}

/// One atomic revision transition.
#[derive(Debug, Clone)]
pub struct RevisionTransition {
    pub revision_id: Uuid,
    pub page_id: Uuid,
    pub site_id: Uuid,
    pub expected: RevisionStatus,
    pub workflow: RevisionWorkflow,
    pub page: PageProjection,
    pub publication: Option<NewPublicationEntry>,
    pub review: Option<NewReviewEvent>,
    pub activity: Option<NewActivity>,
    pub at: DateTime<Utc>,
}

/// One atomic page-only transition (unpublish).
#[derive(Debug, Clone)]
pub struct PageTransition {
    pub page_id: Uuid,
    pub site_id: Uuid,
    pub expected: PageStatus,
    pub page: PageProjection,
    pub publication: Option<NewPublicationEntry>,
    pub at: DateTime<Utc>,
}

/// Storage backend for the revision workflow.
///
/// `PgStore` is the production implementation; `InMemoryStore` backs tests.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Cheap connectivity probe for health checks.
    async fn health_check(&self) -> StoreResult<()>;

    async fn get_site(&self, id: Uuid) -> StoreResult<Option<Site>>;

    async fn get_page(&self, id: Uuid) -> StoreResult<Option<Page>>;

    /// Loads a revision with its blocks in sort order.
    async fn get_revision(&self, id: Uuid) -> StoreResult<Option<Revision>>;

    /// Inserts a DRAFT revision and its blocks as one unit.
    async fn create_revision(
        &self,
        page: &Page,
        input: &NewRevision,
        at: DateTime<Utc>,
    ) -> StoreResult<Revision>;

    /// Most recently published revision of a page, ignoring `excluding`.
    async fn latest_published_revision(
        &self,
        page_id: Uuid,
        excluding: Uuid,
    ) -> StoreResult<Option<Revision>>;

    /// SCHEDULED revisions with `scheduled_for <= now`, oldest first.
    async fn due_revisions(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Revision>>;

    /// Oldest due revision of a single page.
    async fn due_revision_for_page(
        &self,
        page_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Revision>>;

    async fn apply_revision_transition(
        &self,
        transition: &RevisionTransition,
    ) -> StoreResult<CasResult<RevisionStatus>>;

    async fn apply_page_transition(
        &self,
        transition: &PageTransition,
    ) -> StoreResult<CasResult<PageStatus>>;

    /// Most recent first.
    async fn list_publication_log(
        &self,
        page_id: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<PublicationLogEntry>>;

    /// Most recent first, optionally narrowed to one revision.
    async fn list_review_events(
        &self,
        page_id: Uuid,
        revision_id: Option<Uuid>,
        limit: i64,
    ) -> StoreResult<Vec<ReviewEvent>>;

    /// Most recent first.
    async fn list_activity(&self, page_id: Uuid, limit: i64) -> StoreResult<Vec<ActivityEntry>>;

    /// Active endpoints of a site subscribed to `event_type`.
    async fn webhooks_for_event(
        &self,
        site_id: Uuid,
        event_type: &str,
    ) -> StoreResult<Vec<WebhookEndpoint>>;

    /// Records a PENDING delivery before the first attempt.
    async fn begin_webhook_delivery(
        &self,
        delivery: &NewWebhookDelivery,
        at: DateTime<Utc>,
    ) -> StoreResult<WebhookDelivery>;

    async fn complete_webhook_delivery(
        &self,
        id: Uuid,
        outcome: &DeliveryOutcome,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;
}
