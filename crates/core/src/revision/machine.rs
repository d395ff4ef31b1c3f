//! Revision transition table.
//!
//! Pure planning: given a revision and an operation, decide whether the move
//! is legal and what the revision, page and audit trail look like afterwards.
//! Nothing here touches storage; [`WorkflowService`](super::service::WorkflowService)
//! applies the plan atomically.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::types::{PublicationAction, PublicationSource, ReviewEventType};
use crate::content::model::{PageStatus, Revision, RevisionStatus, RevisionWorkflow};
use crate::error::{WorkflowError, WorkflowResult};

use RevisionStatus::{Draft, Published, Review, Scheduled};

/// A requested revision transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    SubmitForReview,
    Approve,
    RequestChanges,
    Schedule {
        at: DateTime<Utc>,
        timezone: String,
    },
    CancelSchedule,
    PublishNow,
    AutoPublish {
        source: PublicationSource,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SubmitForReview => "submitForReview",
            Self::Approve => "approve",
            Self::RequestChanges => "requestChanges",
            Self::Schedule { .. } => "schedule",
            Self::CancelSchedule => "cancelSchedule",
            Self::PublishNow => "publishNow",
            Self::AutoPublish { .. } => "autoPublish",
        }
    }

    /// Statuses this operation may start from.
    pub fn allowed_from(&self) -> &'static [RevisionStatus] {
        match self {
            Self::SubmitForReview => &[Draft],
            Self::Approve | Self::Schedule { .. } => &[Review],
            Self::CancelSchedule | Self::AutoPublish { .. } => &[Scheduled],
            Self::RequestChanges | Self::PublishNow => &[Draft, Review, Scheduled],
        }
    }

    /// Status the revision ends in.
    pub fn target(&self) -> RevisionStatus {
        match self {
            Self::SubmitForReview | Self::Approve | Self::CancelSchedule => Review,
            Self::RequestChanges => Draft,
            Self::Schedule { .. } => Scheduled,
            Self::PublishNow | Self::AutoPublish { .. } => Published,
        }
    }
}

/// Whether `op` may be applied to a revision in `from`.
pub fn can_apply(from: RevisionStatus, op: &Operation) -> bool {
    op.allowed_from().contains(&from)
}

/// Everything a legal transition writes.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub expected: RevisionStatus,
    pub workflow: RevisionWorkflow,
    pub page_status: PageStatus,
    /// Set on publication: stamps the page and projects revision metadata onto it.
    pub published_at: Option<DateTime<Utc>>,
    pub publication: Option<(PublicationAction, PublicationSource)>,
    pub review: Option<ReviewEventType>,
    /// Activity feed kind, when the operation appears in the feed.
    pub activity: Option<&'static str>,
}

/// Validate `op` against the revision's current state and plan its effects.
pub fn plan(
    revision: &Revision,
    op: &Operation,
    actor_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> WorkflowResult<TransitionPlan> {
    let from = revision.status();
    if !can_apply(from, op) {
        return Err(WorkflowError::invalid(format!(
            "cannot {} a revision in status {from}",
            op.name()
        )));
    }

    let mut workflow = revision.workflow.clone();
    workflow.status = op.target();

    let mut plan = TransitionPlan {
        expected: from,
        page_status: workflow.status.page_status(),
        workflow,
        published_at: None,
        publication: None,
        review: None,
        activity: None,
    };

    match op {
        Operation::SubmitForReview => {
            plan.workflow.clear_review();
            plan.review = Some(ReviewEventType::Submitted);
            plan.activity = Some("revision.submitted");
        }
        Operation::Approve => {
            plan.workflow.reviewed_at = Some(now);
            plan.workflow.reviewed_by_id = actor_id;
            plan.review = Some(ReviewEventType::Approved);
            plan.activity = Some("revision.approved");
        }
        Operation::RequestChanges => {
            plan.workflow.clear_review();
            plan.workflow.clear_schedule();
            plan.review = Some(ReviewEventType::ChangesRequested);
            plan.activity = Some("revision.changes_requested");
        }
        Operation::Schedule { at, timezone } => {
            if *at <= now {
                return Err(WorkflowError::invalid(
                    "scheduled time must be in the future",
                ));
            }
            plan.workflow.scheduled_for = Some(*at);
            plan.workflow.scheduled_timezone = Some(timezone.clone());
            plan.workflow.scheduled_by_id = actor_id;
            plan.publication = Some((PublicationAction::Schedule, PublicationSource::Manual));
        }
        Operation::CancelSchedule => {
            plan.workflow.clear_schedule();
            plan.publication = Some((PublicationAction::Unschedule, PublicationSource::Manual));
        }
        Operation::PublishNow => {
            plan.workflow.published_at = Some(now);
            plan.published_at = Some(now);
            plan.publication = Some((PublicationAction::Publish, PublicationSource::Manual));
        }
        Operation::AutoPublish { source } => {
            if !revision.is_due(now) {
                return Err(WorkflowError::invalid("revision is not due yet"));
            }
            plan.workflow.published_at = Some(now);
            plan.published_at = Some(now);
            plan.publication = Some((PublicationAction::AutoPublish, *source));
        }
    }

    Ok(plan)
}
