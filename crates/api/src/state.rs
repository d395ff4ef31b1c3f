use std::sync::Arc;

use folio_core::events::bus::EventBus;
use folio_core::revision::WorkflowService;
use folio_core::store::WorkflowStore;
use folio_core::time::Clock;

use crate::config::AppConfig;

/// Shared application state, passed to all handlers via Axum's `State` extractor.
/// Wrapped in `Arc` so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    store: Arc<dyn WorkflowStore>,
    workflow: WorkflowService,
    config: AppConfig,
    event_bus: EventBus,
}

impl AppState {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        clock: Arc<dyn Clock>,
        config: AppConfig,
        event_bus: EventBus,
    ) -> Self {
        let workflow = WorkflowService::new(store.clone(), clock, event_bus.clone());
        Self {
            inner: Arc::new(InnerState {
                store,
                workflow,
                config,
                event_bus,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.inner.store
    }

    pub fn workflow(&self) -> &WorkflowService {
        &self.inner.workflow
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }
}
