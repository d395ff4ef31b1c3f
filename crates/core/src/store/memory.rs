//! In-memory store implementation for testing.
//!
//! [`InMemoryStore`] keeps every table in one `RwLock`, so each transition is
//! trivially atomic: the status check and all writes happen under a single
//! write guard.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no durability, no cross-process coordination
//! - **No persistence**: all state is lost when the process exits

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::{
    CasResult, PageProjection, PageTransition, RevisionTransition, StoreResult, WorkflowStore,
};
use crate::audit::types::{
    ActivityEntry, NewPublicationEntry, PublicationLogEntry, ReviewEvent,
};
use crate::content::model::{
    NewRevision, Page, PageStatus, Revision, RevisionStatus, RevisionWorkflow, Site,
};
use crate::dispatch::webhook::{
    DeliveryOutcome, DeliveryStatus, NewWebhookDelivery, WebhookDelivery, WebhookEndpoint,
};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct State {
    sites: HashMap<Uuid, Site>,
    pages: HashMap<Uuid, Page>,
    revisions: HashMap<Uuid, Revision>,
    publication_log: Vec<PublicationLogEntry>,
    review_events: Vec<ReviewEvent>,
    activity: Vec<ActivityEntry>,
    webhooks: Vec<WebhookEndpoint>,
    deliveries: Vec<WebhookDelivery>,
    /// Revisions whose transitions fail with a write error.
    failing: HashSet<Uuid>,
}

/// In-memory [`WorkflowStore`] for tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Poisoned
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(poison_err)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(poison_err)
    }

    fn write_unchecked(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Seeding helpers (pages and sites are created outside the workflow) ---

    pub fn insert_site(&self, slug: &str, timezone: &str) -> Site {
        let site = Site {
            id: Uuid::now_v7(),
            slug: slug.to_string(),
            name: slug.to_string(),
            timezone: timezone.to_string(),
        };
        self.write_unchecked().sites.insert(site.id, site.clone());
        site
    }

    pub fn insert_page(&self, site_id: Uuid, path: &str, title: &str) -> Page {
        let page = Page {
            id: Uuid::now_v7(),
            site_id,
            path: path.to_string(),
            title: title.to_string(),
            status: PageStatus::Draft,
            published_at: None,
            meta: Value::Object(Default::default()),
            updated_at: Utc::now(),
        };
        self.put_page(page.clone());
        page
    }

    /// Insert or replace a page row as-is.
    pub fn put_page(&self, page: Page) {
        self.write_unchecked().pages.insert(page.id, page);
    }

    pub fn insert_webhook(
        &self,
        site_id: Uuid,
        url: &str,
        secret: Option<&str>,
        events: &[&str],
    ) -> WebhookEndpoint {
        let endpoint = WebhookEndpoint {
            id: Uuid::now_v7(),
            site_id,
            url: url.to_string(),
            secret: secret.map(str::to_string),
            events: events.iter().map(|e| e.to_string()).collect(),
            active: true,
        };
        self.write_unchecked().webhooks.push(endpoint.clone());
        endpoint
    }

    pub fn webhook_deliveries(&self) -> Vec<WebhookDelivery> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .deliveries
            .clone()
    }

    /// Make every transition of `revision_id` fail with a write error.
    pub fn fail_transitions_for(&self, revision_id: Uuid) {
        self.write_unchecked().failing.insert(revision_id);
    }
}

impl State {
    fn project_page(&mut self, page_id: Uuid, projection: &PageProjection, at: DateTime<Utc>) {
        if let Some(page) = self.pages.get_mut(&page_id) {
            page.status = projection.status;
            if let Some(published_at) = projection.published_at {
                page.published_at = Some(published_at);
            }
            if let Some(meta) = &projection.meta {
                page.meta = meta.clone();
            }
            page.updated_at = at;
        }
    }

    fn append_publication(
        &mut self,
        site_id: Uuid,
        page_id: Uuid,
        entry: &NewPublicationEntry,
        at: DateTime<Utc>,
    ) {
        self.publication_log.push(PublicationLogEntry {
            id: Uuid::now_v7(),
            site_id,
            page_id,
            revision_id: entry.revision_id,
            actor_id: entry.actor_id,
            action: entry.action,
            source: entry.source,
            metadata: entry.metadata.clone(),
            occurred_at: at,
        });
    }
}

/// Most recent first: later insertions win ties on timestamp.
fn newest_first<T: Clone>(
    rows: &[T],
    limit: i64,
    keep: impl Fn(&T) -> bool,
    at: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    let mut selected: Vec<T> = rows.iter().rev().filter(|r| keep(r)).cloned().collect();
    selected.sort_by(|a, b| at(b).cmp(&at(a)));
    selected.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
    selected
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        self.read().map(|_| ())
    }

    async fn get_site(&self, id: Uuid) -> StoreResult<Option<Site>> {
        Ok(self.read()?.sites.get(&id).cloned())
    }

    async fn get_page(&self, id: Uuid) -> StoreResult<Option<Page>> {
        Ok(self.read()?.pages.get(&id).cloned())
    }

    async fn get_revision(&self, id: Uuid) -> StoreResult<Option<Revision>> {
        Ok(self.read()?.revisions.get(&id).cloned())
    }

    async fn create_revision(
        &self,
        page: &Page,
        input: &NewRevision,
        at: DateTime<Utc>,
    ) -> StoreResult<Revision> {
        let revision = Revision {
            id: Uuid::now_v7(),
            page_id: page.id,
            site_id: page.site_id,
            author_id: input.author_id,
            summary: input.summary.clone(),
            meta: input.meta.clone(),
            created_at: at,
            workflow: RevisionWorkflow::draft(),
            blocks: input.blocks.clone(),
        };
        self.write()?
            .revisions
            .insert(revision.id, revision.clone());
        Ok(revision)
    }

    async fn latest_published_revision(
        &self,
        page_id: Uuid,
        excluding: Uuid,
    ) -> StoreResult<Option<Revision>> {
        Ok(self
            .read()?
            .revisions
            .values()
            .filter(|r| {
                r.page_id == page_id && r.id != excluding && r.status() == RevisionStatus::Published
            })
            .max_by_key(|r| (r.workflow.published_at, r.id))
            .cloned())
    }

    async fn due_revisions(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Revision>> {
        let mut due: Vec<Revision> = self
            .read()?
            .revisions
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| (r.workflow.scheduled_for, r.id));
        due.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(due)
    }

    async fn due_revision_for_page(
        &self,
        page_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Revision>> {
        Ok(self
            .read()?
            .revisions
            .values()
            .filter(|r| r.page_id == page_id && r.is_due(now))
            .min_by_key(|r| (r.workflow.scheduled_for, r.id))
            .cloned())
    }

    async fn apply_revision_transition(
        &self,
        t: &RevisionTransition,
    ) -> StoreResult<CasResult<RevisionStatus>> {
        let mut state = self.write()?;

        if state.failing.contains(&t.revision_id) {
            return Err(StoreError::WriteFailed(format!(
                "injected failure for revision {}",
                t.revision_id
            )));
        }
        if !state.pages.contains_key(&t.page_id) {
            return Ok(CasResult::NotFound);
        }
        let Some(revision) = state.revisions.get_mut(&t.revision_id) else {
            return Ok(CasResult::NotFound);
        };
        if revision.page_id != t.page_id {
            return Ok(CasResult::NotFound);
        }
        if revision.status() != t.expected {
            return Ok(CasResult::StateMismatch {
                actual: revision.status(),
            });
        }

        revision.workflow = t.workflow.clone();
        state.project_page(t.page_id, &t.page, t.at);

        if let Some(entry) = &t.publication {
            state.append_publication(t.site_id, t.page_id, entry, t.at);
        }
        if let Some(review) = &t.review {
            state.review_events.push(ReviewEvent {
                id: Uuid::now_v7(),
                site_id: t.site_id,
                page_id: t.page_id,
                revision_id: t.revision_id,
                actor_id: review.actor_id,
                event_type: review.event_type,
                note: review.note.clone(),
                created_at: t.at,
            });
        }
        if let Some(activity) = &t.activity {
            state.activity.push(ActivityEntry {
                id: Uuid::now_v7(),
                site_id: t.site_id,
                page_id: t.page_id,
                revision_id: Some(t.revision_id),
                actor_id: activity.actor_id,
                kind: activity.kind.clone(),
                data: activity.data.clone(),
                created_at: t.at,
            });
        }

        Ok(CasResult::Success)
    }

    async fn apply_page_transition(
        &self,
        t: &PageTransition,
    ) -> StoreResult<CasResult<PageStatus>> {
        let mut state = self.write()?;

        let Some(page) = state.pages.get(&t.page_id) else {
            return Ok(CasResult::NotFound);
        };
        if page.status != t.expected {
            return Ok(CasResult::StateMismatch {
                actual: page.status,
            });
        }

        state.project_page(t.page_id, &t.page, t.at);
        if let Some(entry) = &t.publication {
            state.append_publication(t.site_id, t.page_id, entry, t.at);
        }
        Ok(CasResult::Success)
    }

    async fn list_publication_log(
        &self,
        page_id: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<PublicationLogEntry>> {
        Ok(newest_first(
            &self.read()?.publication_log,
            limit,
            |e| e.page_id == page_id,
            |e| e.occurred_at,
        ))
    }

    async fn list_review_events(
        &self,
        page_id: Uuid,
        revision_id: Option<Uuid>,
        limit: i64,
    ) -> StoreResult<Vec<ReviewEvent>> {
        Ok(newest_first(
            &self.read()?.review_events,
            limit,
            |e| e.page_id == page_id && revision_id.map_or(true, |id| e.revision_id == id),
            |e| e.created_at,
        ))
    }

    async fn list_activity(&self, page_id: Uuid, limit: i64) -> StoreResult<Vec<ActivityEntry>> {
        Ok(newest_first(
            &self.read()?.activity,
            limit,
            |e| e.page_id == page_id,
            |e| e.created_at,
        ))
    }

    async fn webhooks_for_event(
        &self,
        site_id: Uuid,
        event_type: &str,
    ) -> StoreResult<Vec<WebhookEndpoint>> {
        Ok(self
            .read()?
            .webhooks
            .iter()
            .filter(|w| w.site_id == site_id && w.subscribes_to(event_type))
            .cloned()
            .collect())
    }

    async fn begin_webhook_delivery(
        &self,
        delivery: &NewWebhookDelivery,
        at: DateTime<Utc>,
    ) -> StoreResult<WebhookDelivery> {
        let record = WebhookDelivery {
            id: Uuid::now_v7(),
            webhook_id: delivery.webhook_id,
            event_type: delivery.event_type.clone(),
            payload: delivery.payload.clone(),
            status: DeliveryStatus::Pending,
            response_code: None,
            error: None,
            attempts: 0,
            created_at: at,
            completed_at: None,
        };
        self.write()?.deliveries.push(record.clone());
        Ok(record)
    }

    async fn complete_webhook_delivery(
        &self,
        id: Uuid,
        outcome: &DeliveryOutcome,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        if let Some(record) = state.deliveries.iter_mut().find(|d| d.id == id) {
            record.status = outcome.status;
            record.response_code = outcome.response_code.map(i32::from);
            record.error = outcome.error.clone();
            record.attempts = i32::try_from(outcome.attempts).unwrap_or(i32::MAX);
            record.completed_at = Some(at);
        }
        Ok(())
    }
}
