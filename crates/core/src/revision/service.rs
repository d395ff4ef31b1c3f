use std::sync::Arc;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::diff::{diff_revisions, RevisionDiff};
use super::machine::{plan, Operation, TransitionPlan};
use crate::audit::types::{
    ActivityEntry, NewActivity, NewPublicationEntry, NewReviewEvent, PublicationAction,
    PublicationLogEntry, PublicationSource, ReviewEvent, DEFAULT_ACTIVITY_LIMIT,
    DEFAULT_PUBLICATION_LOG_LIMIT, DEFAULT_REVIEW_EVENT_LIMIT,
};
use crate::content::model::{NewRevision, Page, PageStatus, Revision, RevisionStatus};
use crate::content::validate::validate_new_revision;
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::bus::EventBus;
use crate::events::types::PublicationEvent;
use crate::store::{CasResult, PageProjection, PageTransition, RevisionTransition, WorkflowStore};
use crate::time::{self, Clock};

/// Who is acting on which revision.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    pub page_id: Uuid,
    pub revision_id: Uuid,
    pub actor_id: Option<Uuid>,
    /// Free-text note recorded on review events.
    pub note: Option<String>,
}

impl ActionContext {
    pub fn new(page_id: Uuid, revision_id: Uuid, actor_id: Option<Uuid>) -> Self {
        Self {
            page_id,
            revision_id,
            actor_id,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Entry point for every revision workflow operation.
///
/// Each operation loads the revision, plans the transition, writes it through
/// a single compare-and-swap and, when a publication action was recorded,
/// announces it on the event bus after the write committed.
#[derive(Clone)]
pub struct WorkflowService {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn WorkflowStore>, clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self {
            store,
            clock,
            events,
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // -----------------------------------------------------------------------
    // Authoring
    // -----------------------------------------------------------------------

    /// Store a new DRAFT revision of `page_id`. Page status is left untouched.
    pub async fn create_revision(
        &self,
        page_id: Uuid,
        mut input: NewRevision,
    ) -> WorkflowResult<Revision> {
        validate_new_revision(&mut input).map_err(WorkflowError::Validation)?;
        let page = self.load_page(page_id).await?;
        let revision = self
            .store
            .create_revision(&page, &input, self.clock.now())
            .await?;

        tracing::info!(
            page_id = %page_id,
            revision_id = %revision.id,
            blocks = revision.blocks.len(),
            "Revision created"
        );
        Ok(revision)
    }

    // -----------------------------------------------------------------------
    // Review
    // -----------------------------------------------------------------------

    pub async fn submit_for_review(&self, ctx: &ActionContext) -> WorkflowResult<Revision> {
        self.transition(ctx, Operation::SubmitForReview).await
    }

    pub async fn approve(&self, ctx: &ActionContext) -> WorkflowResult<Revision> {
        self.transition(ctx, Operation::Approve).await
    }

    pub async fn request_changes(&self, ctx: &ActionContext) -> WorkflowResult<Revision> {
        self.transition(ctx, Operation::RequestChanges).await
    }

    // -----------------------------------------------------------------------
    // Scheduling and publication
    // -----------------------------------------------------------------------

    /// Schedule a revision for `local` wall-clock time in `timezone`, or in the
    /// site's zone when none is given.
    pub async fn schedule(
        &self,
        ctx: &ActionContext,
        local: &str,
        timezone: Option<&str>,
    ) -> WorkflowResult<Revision> {
        let zone = match timezone.map(str::trim).filter(|z| !z.is_empty()) {
            Some(zone) => zone.to_string(),
            None => self.site_timezone(ctx.page_id).await?,
        };
        let tz = time::parse_zone(&zone).map_err(|e| WorkflowError::invalid(e.to_string()))?;
        let at =
            time::local_to_utc(local, &zone).map_err(|e| WorkflowError::invalid(e.to_string()))?;

        self.transition(
            ctx,
            Operation::Schedule {
                at,
                timezone: tz.name().to_string(),
            },
        )
        .await
    }

    pub async fn cancel_schedule(&self, ctx: &ActionContext) -> WorkflowResult<Revision> {
        self.transition(ctx, Operation::CancelSchedule).await
    }

    pub async fn publish_now(&self, ctx: &ActionContext) -> WorkflowResult<Revision> {
        self.transition(ctx, Operation::PublishNow).await
    }

    /// Publish a due SCHEDULED revision on behalf of the system.
    pub async fn auto_publish(
        &self,
        revision: &Revision,
        source: PublicationSource,
    ) -> WorkflowResult<Revision> {
        let ctx = ActionContext::new(revision.page_id, revision.id, None);
        self.transition(&ctx, Operation::AutoPublish { source }).await
    }

    /// Take a PUBLISHED page back to DRAFT. `published_at` is kept.
    pub async fn unpublish(&self, page_id: Uuid, actor_id: Option<Uuid>) -> WorkflowResult<Page> {
        let page = self.load_page(page_id).await?;
        if page.status != PageStatus::Published {
            return Err(WorkflowError::invalid(format!(
                "cannot unpublish a page in status {}",
                page.status
            )));
        }

        let now = self.clock.now();
        let metadata = json!({ "path": page.path, "title": page.title });
        let transition = PageTransition {
            page_id,
            site_id: page.site_id,
            expected: PageStatus::Published,
            page: PageProjection {
                status: PageStatus::Draft,
                published_at: None,
                meta: None,
            },
            publication: Some(NewPublicationEntry {
                revision_id: None,
                actor_id,
                action: PublicationAction::Unpublish,
                source: PublicationSource::Manual,
                metadata: metadata.clone(),
            }),
            at: now,
        };

        match self.store.apply_page_transition(&transition).await? {
            CasResult::Success => {}
            CasResult::NotFound => return Err(WorkflowError::not_found(format!("page {page_id}"))),
            CasResult::StateMismatch { actual } => {
                return Err(WorkflowError::invalid(format!(
                    "page is {actual}; it changed while unpublishing"
                )))
            }
        }

        tracing::info!(page_id = %page_id, actor_id = ?actor_id, "Page unpublished");
        self.announce(PublicationEvent {
            site_id: page.site_id,
            page_id,
            revision_id: None,
            actor_id,
            action: PublicationAction::Unpublish,
            source: PublicationSource::Manual,
            metadata,
            occurred_at: now,
        });

        Ok(Page {
            status: PageStatus::Draft,
            updated_at: now,
            ..page
        })
    }

    /// Publish the oldest due revision of one page, if any.
    ///
    /// Used on the read path so a page is never served stale just because
    /// the sweep has not run yet.
    pub async fn release_due_for_page(&self, page_id: Uuid) -> WorkflowResult<Option<Revision>> {
        let now = self.clock.now();
        let Some(due) = self.store.due_revision_for_page(page_id, now).await? else {
            return Ok(None);
        };
        self.auto_publish(&due, PublicationSource::System)
            .await
            .map(Some)
    }

    /// Page as served to readers, after releasing anything that is due.
    ///
    /// A failed release is logged and the page is served as stored.
    pub async fn view_page(&self, page_id: Uuid) -> WorkflowResult<Page> {
        if let Err(err) = self.release_due_for_page(page_id).await {
            tracing::warn!(page_id = %page_id, error = %err, "Lazy release failed");
        }
        self.load_page(page_id).await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Diff `target_id` against `against`, or against the page's latest
    /// published revision when no comparison is given.
    pub async fn diff(&self, target_id: Uuid, against: Option<Uuid>) -> WorkflowResult<RevisionDiff> {
        let target = self.load_revision(target_id).await?;
        let base = match against {
            Some(id) => {
                let base = self.load_revision(id).await?;
                if base.page_id != target.page_id {
                    return Err(WorkflowError::not_found(format!(
                        "revision {id} on page {}",
                        target.page_id
                    )));
                }
                Some(base)
            }
            None => {
                self.store
                    .latest_published_revision(target.page_id, target.id)
                    .await?
            }
        };
        Ok(diff_revisions(base.as_ref(), &target))
    }

    pub async fn list_publication_log(
        &self,
        page_id: Uuid,
        limit: Option<i64>,
    ) -> WorkflowResult<Vec<PublicationLogEntry>> {
        let limit = limit.unwrap_or(DEFAULT_PUBLICATION_LOG_LIMIT);
        Ok(self.store.list_publication_log(page_id, limit).await?)
    }

    pub async fn list_review_events(
        &self,
        page_id: Uuid,
        revision_id: Option<Uuid>,
        limit: Option<i64>,
    ) -> WorkflowResult<Vec<ReviewEvent>> {
        let limit = limit.unwrap_or(DEFAULT_REVIEW_EVENT_LIMIT);
        Ok(self
            .store
            .list_review_events(page_id, revision_id, limit)
            .await?)
    }

    pub async fn list_activity(
        &self,
        page_id: Uuid,
        limit: Option<i64>,
    ) -> WorkflowResult<Vec<ActivityEntry>> {
        let limit = limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT);
        Ok(self.store.list_activity(page_id, limit).await?)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn load_page(&self, page_id: Uuid) -> WorkflowResult<Page> {
        self.store
            .get_page(page_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("page {page_id}")))
    }

    async fn load_revision(&self, revision_id: Uuid) -> WorkflowResult<Revision> {
        self.store
            .get_revision(revision_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("revision {revision_id}")))
    }

    async fn site_timezone(&self, page_id: Uuid) -> WorkflowResult<String> {
        let page = self.load_page(page_id).await?;
        let site = self
            .store
            .get_site(page.site_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("site {}", page.site_id)))?;
        Ok(site.timezone)
    }

    async fn transition(&self, ctx: &ActionContext, op: Operation) -> WorkflowResult<Revision> {
        let page = self.load_page(ctx.page_id).await?;
        let revision = self.load_revision(ctx.revision_id).await?;
        if revision.page_id != page.id {
            return Err(WorkflowError::not_found(format!(
                "revision {} on page {}",
                revision.id, page.id
            )));
        }

        let now = self.clock.now();
        let plan = plan(&revision, &op, ctx.actor_id, now)?;
        let transition = build_transition(ctx, &page, &revision, &plan, now);

        match self.store.apply_revision_transition(&transition).await? {
            CasResult::Success => {}
            CasResult::NotFound => {
                return Err(WorkflowError::not_found(format!("revision {}", revision.id)))
            }
            CasResult::StateMismatch { actual } => {
                tracing::warn!(
                    revision_id = %revision.id,
                    operation = op.name(),
                    expected = %plan.expected,
                    actual = %actual,
                    "Lost transition race"
                );
                return Err(WorkflowError::invalid(format!(
                    "revision is {actual}, expected {}; it changed concurrently",
                    plan.expected
                )));
            }
        }

        tracing::info!(
            page_id = %page.id,
            revision_id = %revision.id,
            operation = op.name(),
            from = %plan.expected,
            to = %plan.workflow.status,
            actor_id = ?ctx.actor_id,
            "Revision transitioned"
        );

        if let Some(entry) = transition.publication {
            self.announce(PublicationEvent {
                site_id: page.site_id,
                page_id: page.id,
                revision_id: entry.revision_id,
                actor_id: entry.actor_id,
                action: entry.action,
                source: entry.source,
                metadata: entry.metadata,
                occurred_at: now,
            });
        }

        Ok(Revision {
            workflow: plan.workflow,
            ..revision
        })
    }

    fn announce(&self, event: PublicationEvent) {
        self.events.publish(event);
    }
}

fn build_transition(
    ctx: &ActionContext,
    page: &Page,
    revision: &Revision,
    plan: &TransitionPlan,
    now: chrono::DateTime<chrono::Utc>,
) -> RevisionTransition {
    let publishing = plan.workflow.status == RevisionStatus::Published;
    let actor_id = match plan.publication {
        Some((PublicationAction::AutoPublish, _)) => None,
        _ => ctx.actor_id,
    };

    RevisionTransition {
        revision_id: revision.id,
        page_id: page.id,
        site_id: page.site_id,
        expected: plan.expected,
        workflow: plan.workflow.clone(),
        page: PageProjection {
            status: plan.page_status,
            published_at: plan.published_at,
            meta: publishing.then(|| revision.meta.clone()),
        },
        publication: plan.publication.map(|(action, source)| NewPublicationEntry {
            revision_id: Some(revision.id),
            actor_id,
            action,
            source,
            metadata: publication_metadata(action, page, revision, plan),
        }),
        review: plan.review.map(|event_type| NewReviewEvent {
            actor_id: ctx.actor_id,
            event_type,
            note: ctx.note.clone(),
        }),
        activity: plan.activity.map(|kind| NewActivity {
            actor_id: ctx.actor_id,
            kind: kind.to_string(),
            data: activity_data(ctx, revision),
        }),
        at: now,
    }
}

fn publication_metadata(
    action: PublicationAction,
    page: &Page,
    revision: &Revision,
    plan: &TransitionPlan,
) -> Value {
    let mut data = Map::new();
    data.insert("path".into(), json!(page.path));
    match action {
        PublicationAction::Schedule => {
            let w = &plan.workflow;
            data.insert("scheduledFor".into(), json!(w.scheduled_for));
            data.insert("timezone".into(), json!(w.scheduled_timezone));
            if let (Some(at), Some(zone)) = (w.scheduled_for, w.scheduled_timezone.as_deref()) {
                if let Ok(local) = time::format_local(at, zone) {
                    data.insert("localTime".into(), json!(local));
                }
            }
        }
        PublicationAction::Unschedule => {
            data.insert(
                "previousScheduledFor".into(),
                json!(revision.workflow.scheduled_for),
            );
        }
        PublicationAction::AutoPublish => {
            data.insert(
                "scheduledFor".into(),
                json!(revision.workflow.scheduled_for),
            );
            data.insert("title".into(), json!(page.title));
        }
        PublicationAction::Publish | PublicationAction::Unpublish => {
            data.insert("title".into(), json!(page.title));
        }
    }
    Value::Object(data)
}

fn activity_data(ctx: &ActionContext, revision: &Revision) -> Value {
    json!({
        "note": ctx.note,
        "summary": revision.summary,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::audit::types::ReviewEventType;
    use crate::content::model::{ContentBlock, Site};
    use crate::store::InMemoryStore;
    use crate::time::FixedClock;

    struct Harness {
        store: Arc<InMemoryStore>,
        clock: Arc<FixedClock>,
        service: WorkflowService,
        site: Site,
        page: Page,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 15, 12, 0, 0).unwrap()
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(start()));
        let site = store.insert_site("acme", "America/New_York");
        let page = store.insert_page(site.id, "/pricing", "Pricing");
        let service = WorkflowService::new(store.clone(), clock.clone(), EventBus::new(16));
        Harness {
            store,
            clock,
            service,
            site,
            page,
        }
    }

    fn input(meta: Value) -> NewRevision {
        NewRevision {
            author_id: Some(Uuid::new_v4()),
            summary: Some("copy edits".to_string()),
            meta,
            blocks: vec![ContentBlock {
                kind: "hero".to_string(),
                sort_order: 0,
                data: json!({ "heading": "Plans" }),
                settings: json!({}),
            }],
        }
    }

    impl Harness {
        async fn draft(&self) -> Revision {
            self.service
                .create_revision(self.page.id, input(json!({ "title": "Pricing | Acme" })))
                .await
                .unwrap()
        }

        fn ctx(&self, revision: &Revision) -> ActionContext {
            ActionContext::new(self.page.id, revision.id, Some(Uuid::new_v4()))
        }

        async fn in_review(&self) -> Revision {
            let rev = self.draft().await;
            self.service.submit_for_review(&self.ctx(&rev)).await.unwrap()
        }

        async fn page(&self) -> Page {
            self.store.get_page(self.page.id).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn create_revision_starts_as_draft() {
        let h = harness();
        let rev = h.draft().await;
        assert_eq!(rev.status(), RevisionStatus::Draft);
        assert_eq!(rev.created_at, start());
        assert_eq!(h.page().await.status, PageStatus::Draft);
    }

    #[tokio::test]
    async fn create_revision_rejects_bad_input() {
        let h = harness();
        let err = h
            .service
            .create_revision(h.page.id, input(json!("not an object")))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[tokio::test]
    async fn create_revision_for_missing_page_is_not_found() {
        let h = harness();
        let err = h
            .service
            .create_revision(Uuid::new_v4(), input(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn submit_writes_review_event_and_activity() {
        let h = harness();
        let rev = h.draft().await;
        let ctx = h.ctx(&rev).with_note("ready");
        let rev = h.service.submit_for_review(&ctx).await.unwrap();

        assert_eq!(rev.status(), RevisionStatus::Review);
        assert_eq!(h.page().await.status, PageStatus::Review);

        let events = h.service.list_review_events(h.page.id, None, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, ReviewEventType::Submitted);
        assert_eq!(events[0].note.as_deref(), Some("ready"));
        assert_eq!(events[0].actor_id, ctx.actor_id);

        let activity = h.service.list_activity(h.page.id, None).await.unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].kind, "revision.submitted");
    }

    #[tokio::test]
    async fn approve_twice_is_allowed() {
        let h = harness();
        let rev = h.in_review().await;
        h.service.approve(&h.ctx(&rev)).await.unwrap();
        let again = h.service.approve(&h.ctx(&rev)).await.unwrap();
        assert_eq!(again.status(), RevisionStatus::Review);
        assert!(again.workflow.reviewed_by_id.is_some());
    }

    #[tokio::test]
    async fn request_changes_returns_to_draft() {
        let h = harness();
        let rev = h.in_review().await;
        let rev = h.service.request_changes(&h.ctx(&rev)).await.unwrap();
        assert_eq!(rev.status(), RevisionStatus::Draft);
        assert_eq!(h.page().await.status, PageStatus::Draft);
    }

    #[tokio::test]
    async fn request_changes_on_scheduled_revision_clears_schedule() {
        let h = harness();
        let rev = h.in_review().await;
        let ctx = h.ctx(&rev);
        h.service.approve(&ctx).await.unwrap();
        h.service.schedule(&ctx, "2031-01-01T00:00", Some("UTC")).await.unwrap();
        assert_eq!(h.page().await.status, PageStatus::Scheduled);

        let rev = h
            .service
            .request_changes(&ctx.clone().with_note("hold the launch"))
            .await
            .unwrap();
        assert_eq!(rev.status(), RevisionStatus::Draft);
        assert_eq!(rev.workflow.scheduled_for, None);
        assert_eq!(rev.workflow.scheduled_by_id, None);
        assert_eq!(rev.workflow.scheduled_timezone, None);
        assert_eq!(rev.workflow.reviewed_at, None);
        assert_eq!(rev.workflow.reviewed_by_id, None);

        let stored = h.store.get_revision(rev.id).await.unwrap().unwrap();
        assert_eq!(stored.workflow, rev.workflow);
        assert_eq!(h.page().await.status, PageStatus::Draft);

        let events = h
            .service
            .list_review_events(h.page.id, Some(rev.id), None)
            .await
            .unwrap();
        assert_eq!(events[0].event_type, ReviewEventType::ChangesRequested);
        assert_eq!(events[0].note.as_deref(), Some("hold the launch"));

        h.clock.advance(Duration::days(400));
        assert!(h.service.release_due_for_page(h.page.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn request_changes_on_draft_is_allowed() {
        let h = harness();
        let rev = h.draft().await;
        let rev = h.service.request_changes(&h.ctx(&rev)).await.unwrap();
        assert_eq!(rev.status(), RevisionStatus::Draft);
    }

    #[tokio::test]
    async fn request_changes_on_published_is_rejected() {
        let h = harness();
        let rev = h.draft().await;
        h.service.publish_now(&h.ctx(&rev)).await.unwrap();
        let err = h.service.request_changes(&h.ctx(&rev)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn revision_of_another_page_is_not_found() {
        let h = harness();
        let rev = h.draft().await;
        let other = h.store.insert_page(h.site.id, "/about", "About");
        let ctx = ActionContext::new(other.id, rev.id, None);
        let err = h.service.submit_for_review(&ctx).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn schedule_converts_site_zone_to_utc() {
        let h = harness();
        let rev = h.in_review().await;
        let rev = h
            .service
            .schedule(&h.ctx(&rev), "2030-02-01T09:00", None)
            .await
            .unwrap();

        assert_eq!(rev.status(), RevisionStatus::Scheduled);
        assert_eq!(
            rev.workflow.scheduled_for,
            Some(Utc.with_ymd_and_hms(2030, 2, 1, 14, 0, 0).unwrap())
        );
        assert_eq!(rev.workflow.scheduled_timezone.as_deref(), Some("America/New_York"));
        assert_eq!(h.page().await.status, PageStatus::Scheduled);

        let log = h.service.list_publication_log(h.page.id, None).await.unwrap();
        assert_eq!(log[0].action, PublicationAction::Schedule);
        assert_eq!(log[0].source, PublicationSource::Manual);
        assert_eq!(log[0].metadata["localTime"], "2030-02-01T09:00");
    }

    #[tokio::test]
    async fn schedule_rejects_past_and_bad_input() {
        let h = harness();
        let rev = h.in_review().await;
        let ctx = h.ctx(&rev);
        for (local, zone) in [
            ("2029-12-31T09:00", Some("UTC")),
            ("2030-02-01T09:00", Some("Mars/Olympus")),
            ("next tuesday", Some("UTC")),
            ("2030-03-10T02:30", Some("America/New_York")),
        ] {
            let err = h.service.schedule(&ctx, local, zone).await.unwrap_err();
            assert!(matches!(err, WorkflowError::InvalidTransition(_)), "{local}");
        }
        let unchanged = h.store.get_revision(rev.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status(), RevisionStatus::Review);
        assert!(h.service.list_publication_log(h.page.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_schedule_clears_envelope() {
        let h = harness();
        let rev = h.in_review().await;
        let ctx = h.ctx(&rev);
        h.service.schedule(&ctx, "2030-02-01T09:00", Some("UTC")).await.unwrap();
        let rev = h.service.cancel_schedule(&ctx).await.unwrap();

        assert_eq!(rev.status(), RevisionStatus::Review);
        assert_eq!(rev.workflow.scheduled_for, None);
        assert_eq!(rev.workflow.scheduled_timezone, None);
        assert_eq!(h.page().await.status, PageStatus::Review);

        let log = h.service.list_publication_log(h.page.id, None).await.unwrap();
        assert_eq!(log[0].action, PublicationAction::Unschedule);
    }

    #[tokio::test]
    async fn publish_now_projects_meta_and_announces() {
        let h = harness();
        let mut events = h.service.events().subscribe();
        let rev = h.draft().await;
        let actor = Uuid::new_v4();
        let ctx = ActionContext::new(h.page.id, rev.id, Some(actor));
        let rev = h.service.publish_now(&ctx).await.unwrap();

        assert_eq!(rev.status(), RevisionStatus::Published);
        assert_eq!(rev.workflow.published_at, Some(start()));
        let page = h.page().await;
        assert_eq!(page.status, PageStatus::Published);
        assert_eq!(page.published_at, Some(start()));
        assert_eq!(page.meta, json!({ "title": "Pricing | Acme" }));

        let event = events.try_recv().unwrap();
        assert_eq!(event.action, PublicationAction::Publish);
        assert_eq!(event.actor_id, Some(actor));
        assert_eq!(event.revision_id, Some(rev.id));

        let err = h.service.publish_now(&ctx).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition(_)));

        let log = h.service.list_publication_log(h.page.id, None).await.unwrap();
        let publishes = log
            .iter()
            .filter(|e| e.action == PublicationAction::Publish)
            .count();
        assert_eq!(publishes, 1);
    }

    #[tokio::test]
    async fn unpublish_keeps_published_at() {
        let h = harness();
        let rev = h.draft().await;
        h.service.publish_now(&h.ctx(&rev)).await.unwrap();
        h.clock.advance(Duration::hours(1));

        let page = h.service.unpublish(h.page.id, None).await.unwrap();
        assert_eq!(page.status, PageStatus::Draft);
        let stored = h.page().await;
        assert_eq!(stored.status, PageStatus::Draft);
        assert_eq!(stored.published_at, Some(start()));

        let log = h.service.list_publication_log(h.page.id, None).await.unwrap();
        assert_eq!(log[0].action, PublicationAction::Unpublish);
        assert_eq!(log[0].revision_id, None);

        let err = h.service.unpublish(h.page.id, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn release_due_for_page_publishes_oldest_only() {
        let h = harness();
        let first = h.in_review().await;
        let second = h.in_review().await;
        h.service
            .schedule(&h.ctx(&second), "2030-01-16T12:00", Some("UTC"))
            .await
            .unwrap();
        h.service
            .schedule(&h.ctx(&first), "2030-01-16T11:00", Some("UTC"))
            .await
            .unwrap();

        assert!(h.service.release_due_for_page(h.page.id).await.unwrap().is_none());

        h.clock.advance(Duration::days(2));
        let released = h.service.release_due_for_page(h.page.id).await.unwrap().unwrap();
        assert_eq!(released.id, first.id);

        let queued = h.store.get_revision(second.id).await.unwrap().unwrap();
        assert_eq!(queued.status(), RevisionStatus::Scheduled);

        let log = h.service.list_publication_log(h.page.id, Some(1)).await.unwrap();
        assert_eq!(log[0].action, PublicationAction::AutoPublish);
        assert_eq!(log[0].source, PublicationSource::System);
        assert_eq!(log[0].actor_id, None);
    }

    #[tokio::test]
    async fn view_page_releases_due_revision() {
        let h = harness();
        let rev = h.in_review().await;
        h.service
            .schedule(&h.ctx(&rev), "2030-01-15T13:00", Some("UTC"))
            .await
            .unwrap();
        h.clock.advance(Duration::hours(2));

        let page = h.service.view_page(h.page.id).await.unwrap();
        assert_eq!(page.status, PageStatus::Published);
        assert_eq!(page.meta["title"], "Pricing | Acme");
    }

    #[tokio::test]
    async fn failed_write_leaves_no_trace() {
        let h = harness();
        let rev = h.in_review().await;
        h.store.fail_transitions_for(rev.id);

        let err = h.service.publish_now(&h.ctx(&rev)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Store(_)));
        assert_eq!(h.page().await.status, PageStatus::Review);
        assert!(h.service.list_publication_log(h.page.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn diff_defaults_to_latest_published() {
        let h = harness();
        let published = h.draft().await;
        h.service.publish_now(&h.ctx(&published)).await.unwrap();

        let mut changed = input(json!({ "title": "Pricing | Acme", "noindex": true }));
        changed.blocks[0].data = json!({ "heading": "New plans" });
        let draft = h.service.create_revision(h.page.id, changed).await.unwrap();

        let diff = h.service.diff(draft.id, None).await.unwrap();
        assert_eq!(diff.base_revision_id, Some(published.id));
        assert!(diff.has_changes());

        let same = h.service.diff(draft.id, Some(draft.id)).await.unwrap();
        assert!(!same.has_changes());
    }

    #[tokio::test]
    async fn diff_against_other_page_is_not_found() {
        let h = harness();
        let rev = h.draft().await;
        let other_page = h.store.insert_page(h.site.id, "/about", "About");
        let other = h
            .service
            .create_revision(other_page.id, input(json!({})))
            .await
            .unwrap();
        let err = h.service.diff(rev.id, Some(other.id)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn publication_log_defaults_to_fifteen() {
        let h = harness();
        for _ in 0..20 {
            let rev = h.in_review().await;
            let ctx = h.ctx(&rev);
            h.service.schedule(&ctx, "2031-01-01T00:00", Some("UTC")).await.unwrap();
            h.service.cancel_schedule(&ctx).await.unwrap();
        }
        let log = h.service.list_publication_log(h.page.id, None).await.unwrap();
        assert_eq!(log.len(), 15);
        let log = h.service.list_publication_log(h.page.id, Some(40)).await.unwrap();
        assert_eq!(log.len(), 40);
    }
}
