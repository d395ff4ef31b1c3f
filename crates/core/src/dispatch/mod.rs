//! Post-commit integration fan-out.
//!
//! The [`IntegrationDispatcher`] consumes [`PublicationEvent`]s from the event
//! bus and turns each into webhook deliveries and a search index sync. It runs
//! outside the transition that produced the event: nothing here can fail or
//! roll back an editorial action. Every failure is logged and dropped.

pub mod search;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit::types::PublicationAction;
use crate::content::key::SearchKey;
use crate::content::model::{Page, PageStatus, Site};
use crate::events::types::PublicationEvent;
use crate::store::WorkflowStore;
use crate::time::Clock;

use search::{SearchDocument, SearchIndex};
use webhook::{DeliveryStatus, NewWebhookDelivery, WebhookEndpoint, WebhookPayload, WebhookSender};

/// What a single dispatch did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub webhooks_delivered: usize,
    pub webhooks_failed: usize,
    pub search: SearchSync,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchSync {
    #[default]
    Skipped,
    Upserted,
    Removed,
    Failed,
}

#[derive(Clone)]
pub struct IntegrationDispatcher {
    store: Arc<dyn WorkflowStore>,
    webhooks: Arc<dyn WebhookSender>,
    search: Arc<dyn SearchIndex>,
    clock: Arc<dyn Clock>,
    /// One lock per page so index writes for a page never overtake each other.
    search_locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl IntegrationDispatcher {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        webhooks: Arc<dyn WebhookSender>,
        search: Arc<dyn SearchIndex>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            webhooks,
            search,
            clock,
            search_locks: Arc::default(),
        }
    }

    /// Consume events until `cancel` fires or the bus closes.
    ///
    /// Each event is handled in its own task so a slow endpoint never delays
    /// the next event.
    pub async fn run(
        self,
        mut events: broadcast::Receiver<PublicationEvent>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Integration dispatcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Integration dispatcher stopping");
                    break;
                }
                received = events.recv() => match received {
                    Ok(event) => {
                        let dispatcher = self.clone();
                        tokio::spawn(async move {
                            dispatcher.dispatch(&event).await;
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Integration dispatcher lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, integration dispatcher exiting");
                        break;
                    }
                },
            }
        }
    }

    /// Run every downstream effect of one event.
    pub async fn dispatch(&self, event: &PublicationEvent) -> DispatchReport {
        let (site, page) = match self.load_context(event).await {
            Some(context) => context,
            None => return DispatchReport::default(),
        };

        let (webhooks, search) = tokio::join!(
            self.deliver_webhooks(event, &site, &page),
            self.sync_search(event, &site, &page),
        );

        let report = DispatchReport {
            webhooks_delivered: webhooks.0,
            webhooks_failed: webhooks.1,
            search,
        };
        tracing::debug!(
            page_id = %event.page_id,
            action = event.action.as_str(),
            delivered = report.webhooks_delivered,
            failed = report.webhooks_failed,
            search = ?report.search,
            "Publication event dispatched"
        );
        report
    }

    async fn load_context(&self, event: &PublicationEvent) -> Option<(Site, Page)> {
        let site = self.store.get_site(event.site_id).await;
        let page = self.store.get_page(event.page_id).await;
        match (site, page) {
            (Ok(Some(site)), Ok(Some(page))) => Some((site, page)),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(page_id = %event.page_id, error = %e, "Dispatch: failed to load page context");
                None
            }
            _ => {
                tracing::warn!(page_id = %event.page_id, "Dispatch: page or site no longer exists");
                None
            }
        }
    }

    /// Returns `(delivered, failed)`.
    async fn deliver_webhooks(
        &self,
        event: &PublicationEvent,
        site: &Site,
        page: &Page,
    ) -> (usize, usize) {
        let event_type = event.action.webhook_event();
        let endpoints = match self.store.webhooks_for_event(site.id, event_type).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                tracing::error!(site_id = %site.id, error = %e, "Dispatch: failed to load webhooks");
                return (0, 0);
            }
        };
        if endpoints.is_empty() {
            return (0, 0);
        }

        let payload = WebhookPayload {
            event_type: event_type.to_string(),
            site_id: site.id,
            page_id: page.id,
            revision_id: event.revision_id,
            data: json!({
                "action": event.action,
                "source": event.source,
                "actorId": event.actor_id,
                "path": page.path,
                "title": page.title,
                "status": page.status,
                "publishedAt": page.published_at,
                "metadata": event.metadata,
            }),
            sent_at: self.clock.now(),
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => Arc::new(body),
            Err(e) => {
                tracing::error!(error = %e, "Dispatch: failed to serialize webhook payload");
                return (0, endpoints.len());
            }
        };
        let payload_value = serde_json::to_value(&payload).unwrap_or_default();

        let mut tasks = JoinSet::new();
        for endpoint in endpoints
            .into_iter()
            .filter(|e| e.subscribes_to(event_type))
        {
            let store = Arc::clone(&self.store);
            let sender = Arc::clone(&self.webhooks);
            let clock = Arc::clone(&self.clock);
            let body = Arc::clone(&body);
            let delivery = NewWebhookDelivery {
                webhook_id: endpoint.id,
                event_type: event_type.to_string(),
                payload: payload_value.clone(),
            };
            tasks.spawn(async move {
                deliver_one(store, sender, clock, endpoint, delivery, &body).await
            });
        }

        let mut delivered = 0;
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(DeliveryStatus::Delivered) => delivered += 1,
                Ok(_) => failed += 1,
                Err(e) => {
                    tracing::error!(error = %e, "Dispatch: webhook task panicked");
                    failed += 1;
                }
            }
        }
        (delivered, failed)
    }

    /// Bring the index in line with the page as it is now.
    ///
    /// The page is re-read under its lock, so a late PUBLISH can never
    /// re-index a page that an UNPUBLISH already took down.
    async fn sync_search(&self, event: &PublicationEvent, site: &Site, page: &Page) -> SearchSync {
        if matches!(
            event.action,
            PublicationAction::Schedule | PublicationAction::Unschedule
        ) {
            return SearchSync::Skipped;
        }

        let lock = self.search_lock(page.id).await;
        let result = {
            let _guard = lock.lock().await;
            match self.store.get_page(page.id).await {
                Ok(Some(current)) if current.status == PageStatus::Published => self
                    .search
                    .upsert(&SearchDocument::from_page(site, &current))
                    .await
                    .map(|_| SearchSync::Upserted),
                Ok(Some(current)) => self
                    .search
                    .remove(&SearchKey::new(&site.slug, &current.path))
                    .await
                    .map(|_| SearchSync::Removed),
                Ok(None) => {
                    tracing::warn!(page_id = %page.id, "Dispatch: page vanished before index sync");
                    Ok(SearchSync::Skipped)
                }
                Err(e) => Err(e),
            }
        };
        self.release_search_lock(page.id, lock).await;

        result.unwrap_or_else(|e| {
            tracing::error!(page_id = %page.id, error = %e, "Dispatch: search index sync failed");
            SearchSync::Failed
        })
    }

    async fn search_lock(&self, page_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.search_locks.lock().await;
        Arc::clone(locks.entry(page_id).or_default())
    }

    async fn release_search_lock(&self, page_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.search_locks.lock().await;
        drop(lock);
        if locks
            .get(&page_id)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(&page_id);
        }
    }
}

/// Record, send and complete one delivery. The status is returned for counting.
async fn deliver_one(
    store: Arc<dyn WorkflowStore>,
    sender: Arc<dyn WebhookSender>,
    clock: Arc<dyn Clock>,
    endpoint: WebhookEndpoint,
    delivery: NewWebhookDelivery,
    body: &[u8],
) -> DeliveryStatus {
    let record = match store.begin_webhook_delivery(&delivery, clock.now()).await {
        Ok(record) => Some(record.id),
        Err(e) => {
            tracing::warn!(webhook_id = %endpoint.id, error = %e, "Dispatch: failed to record pending delivery");
            None
        }
    };

    let outcome = sender.send(&endpoint, body).await;

    if let Some(id) = record {
        if let Err(e) = store.complete_webhook_delivery(id, &outcome, clock.now()).await {
            tracing::warn!(delivery_id = %id, error = %e, "Dispatch: failed to record delivery outcome");
        }
    }
    outcome.status
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use super::search::MemorySearchIndex;
    use super::webhook::DeliveryOutcome;
    use super::*;
    use crate::audit::types::PublicationSource;
    use crate::error::StoreError;
    use crate::store::InMemoryStore;
    use crate::time::SystemClock;

    /// Records what it was asked to send; fails for URLs containing "down".
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl WebhookSender for RecordingSender {
        async fn send(&self, endpoint: &WebhookEndpoint, body: &[u8]) -> DeliveryOutcome {
            self.sent
                .lock()
                .unwrap()
                .push((endpoint.url.clone(), body.to_vec()));
            if endpoint.url.contains("down") {
                DeliveryOutcome {
                    status: DeliveryStatus::Failed,
                    response_code: Some(503),
                    error: Some("Webhook returned HTTP 503".to_string()),
                    attempts: 3,
                }
            } else {
                DeliveryOutcome {
                    status: DeliveryStatus::Delivered,
                    response_code: Some(200),
                    error: None,
                    attempts: 1,
                }
            }
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        sender: Arc<RecordingSender>,
        index: Arc<MemorySearchIndex>,
        dispatcher: IntegrationDispatcher,
        site: Site,
        page: Page,
    }

    fn fixture(page_status: PageStatus) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let site = store.insert_site("marketing", "UTC");
        let mut page = store.insert_page(site.id, "/pricing", "Pricing");
        page.status = page_status;
        store.put_page(page.clone());
        let sender = Arc::new(RecordingSender::default());
        let index = Arc::new(MemorySearchIndex::new());
        let dispatcher = IntegrationDispatcher::new(
            store.clone(),
            sender.clone(),
            index.clone(),
            Arc::new(SystemClock),
        );
        Fixture {
            store,
            sender,
            index,
            dispatcher,
            site,
            page,
        }
    }

    fn event(f: &Fixture, action: PublicationAction) -> PublicationEvent {
        PublicationEvent {
            site_id: f.site.id,
            page_id: f.page.id,
            revision_id: Some(Uuid::new_v4()),
            actor_id: None,
            action,
            source: PublicationSource::Manual,
            metadata: json!({}),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_delivers_webhooks_and_indexes_page() {
        let f = fixture(PageStatus::Published);
        f.store.insert_webhook(f.site.id, "https://hooks.example/ok", None, &[]);
        f.store
            .insert_webhook(f.site.id, "https://hooks.example/down", None, &["page.published"]);
        f.store
            .insert_webhook(f.site.id, "https://hooks.example/other", None, &["revision.scheduled"]);

        let report = f.dispatcher.dispatch(&event(&f, PublicationAction::Publish)).await;

        assert_eq!(report.webhooks_delivered, 1);
        assert_eq!(report.webhooks_failed, 1);
        assert_eq!(report.search, SearchSync::Upserted);
        assert!(f.index.get("marketing:/pricing").is_some());

        let sent = f.sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let body: serde_json::Value = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(body["type"], "page.published");
        assert_eq!(body["data"]["path"], "/pricing");

        let deliveries = f.store.webhook_deliveries();
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries.iter().all(|d| d.completed_at.is_some()));
        assert!(deliveries
            .iter()
            .any(|d| d.status == DeliveryStatus::Failed && d.response_code == Some(503)));
    }

    #[tokio::test]
    async fn unpublish_removes_page_from_index() {
        let f = fixture(PageStatus::Draft);
        f.index
            .upsert(&SearchDocument::from_page(&f.site, &f.page))
            .await
            .unwrap();

        let report = f.dispatcher.dispatch(&event(&f, PublicationAction::Unpublish)).await;

        assert_eq!(report.search, SearchSync::Removed);
        assert!(f.index.is_empty());
    }

    /// Holds every upsert open until released, so a concurrent event can queue behind it.
    #[derive(Default)]
    struct GatedIndex {
        inner: MemorySearchIndex,
        upsert_started: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl SearchIndex for GatedIndex {
        async fn upsert(&self, document: &SearchDocument) -> Result<(), StoreError> {
            self.upsert_started.notify_one();
            self.release.notified().await;
            self.inner.upsert(document).await
        }

        async fn remove(&self, key: &SearchKey) -> Result<(), StoreError> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn unpublish_during_slow_publish_leaves_page_unindexed() {
        let f = fixture(PageStatus::Published);
        let index = Arc::new(GatedIndex::default());
        let dispatcher = IntegrationDispatcher::new(
            f.store.clone(),
            f.sender.clone(),
            index.clone(),
            Arc::new(SystemClock),
        );

        let publish = {
            let dispatcher = dispatcher.clone();
            let event = event(&f, PublicationAction::Publish);
            tokio::spawn(async move { dispatcher.dispatch(&event).await })
        };
        index.upsert_started.notified().await;

        let mut page = f.page.clone();
        page.status = PageStatus::Draft;
        f.store.put_page(page);
        let unpublish = {
            let dispatcher = dispatcher.clone();
            let event = event(&f, PublicationAction::Unpublish);
            tokio::spawn(async move { dispatcher.dispatch(&event).await })
        };
        tokio::task::yield_now().await;
        index.release.notify_one();

        assert_eq!(publish.await.unwrap().search, SearchSync::Upserted);
        assert_eq!(unpublish.await.unwrap().search, SearchSync::Removed);
        assert!(index.inner.is_empty());
    }

    #[tokio::test]
    async fn stale_publish_event_does_not_reindex() {
        let f = fixture(PageStatus::Draft);
        let report = f.dispatcher.dispatch(&event(&f, PublicationAction::Publish)).await;
        assert_eq!(report.search, SearchSync::Removed);
        assert!(f.index.is_empty());
    }

    #[tokio::test]
    async fn schedule_only_notifies_webhooks() {
        let f = fixture(PageStatus::Scheduled);
        f.store
            .insert_webhook(f.site.id, "https://hooks.example/ok", None, &["revision.scheduled"]);

        let report = f.dispatcher.dispatch(&event(&f, PublicationAction::Schedule)).await;

        assert_eq!(report.webhooks_delivered, 1);
        assert_eq!(report.search, SearchSync::Skipped);
        assert!(f.index.is_empty());
    }

    #[tokio::test]
    async fn missing_page_is_a_no_op() {
        let f = fixture(PageStatus::Published);
        let mut orphan = event(&f, PublicationAction::Publish);
        orphan.page_id = Uuid::new_v4();

        let report = f.dispatcher.dispatch(&orphan).await;
        assert_eq!(report, DispatchReport::default());
    }

    #[tokio::test]
    async fn run_consumes_bus_until_cancelled() {
        let f = fixture(PageStatus::Published);
        let bus = crate::events::bus::EventBus::new(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(f.dispatcher.clone().run(bus.subscribe(), cancel.clone()));

        bus.publish(event(&f, PublicationAction::Publish));
        for _ in 0..50 {
            if !f.index.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(f.index.get("marketing:/pricing").is_some());

        cancel.cancel();
        handle.await.unwrap();
    }
}
