//! Scheduled publication sweep.
//!
//! Publishes every SCHEDULED revision whose time has come. Items are handled
//! one at a time and independently: a failure is logged and the sweep moves
//! on. Two sweeps racing over the same revision cannot both publish it, the
//! loser's compare-and-swap fails.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit::types::PublicationSource;
use crate::error::WorkflowResult;
use crate::revision::WorkflowService;

/// Default number of revisions released per sweep.
pub const DEFAULT_BATCH_LIMIT: i64 = 25;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Revisions published by this sweep, in release order.
    pub published: Vec<Uuid>,
    /// Due revisions that could not be published.
    pub failed: usize,
}

impl SweepReport {
    pub fn published_count(&self) -> usize {
        self.published.len()
    }
}

/// Release up to `limit` due revisions, oldest `scheduled_for` first.
///
/// Only loading the due set can fail the sweep as a whole.
pub async fn run_scheduled_publications(
    service: &WorkflowService,
    limit: i64,
    source: PublicationSource,
) -> WorkflowResult<SweepReport> {
    let now = service.clock().now();
    let due = service.store().due_revisions(now, limit).await?;
    let mut report = SweepReport::default();

    for revision in &due {
        match service.auto_publish(revision, source).await {
            Ok(published) => report.published.push(published.id),
            Err(e) => {
                report.failed += 1;
                tracing::error!(
                    revision_id = %revision.id,
                    page_id = %revision.page_id,
                    error = %e,
                    "Scheduled publication failed"
                );
            }
        }
    }

    if due.is_empty() {
        tracing::debug!("Scheduler: nothing due");
    } else {
        tracing::info!(
            due = due.len(),
            published = report.published.len(),
            failed = report.failed,
            source = source.as_str(),
            "Scheduler sweep finished"
        );
    }
    Ok(report)
}

/// Run the sweep every `every` until `cancel` fires.
pub async fn run(
    service: WorkflowService,
    every: Duration,
    limit: i64,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = every.as_secs(),
        limit,
        "Scheduler loop started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Scheduler loop stopping");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) =
                    run_scheduled_publications(&service, limit, PublicationSource::Scheduler).await
                {
                    tracing::error!(error = %e, "Scheduler: sweep failed");
                }
            }
        }
    }
}
