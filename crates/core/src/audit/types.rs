use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;

/// Default page size when listing the publication log.
pub const DEFAULT_PUBLICATION_LOG_LIMIT: i64 = 15;

/// Default page size when listing review events.
pub const DEFAULT_REVIEW_EVENT_LIMIT: i64 = 50;

/// Default page size when listing activity.
pub const DEFAULT_ACTIVITY_LIMIT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicationAction {
    Publish,
    Unpublish,
    Schedule,
    Unschedule,
    AutoPublish,
}

impl PublicationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "PUBLISH",
            Self::Unpublish => "UNPUBLISH",
            Self::Schedule => "SCHEDULE",
            Self::Unschedule => "UNSCHEDULE",
            Self::AutoPublish => "AUTO_PUBLISH",
        }
    }

    /// Webhook event type announced for this action.
    pub fn webhook_event(&self) -> &'static str {
        match self {
            Self::Publish | Self::AutoPublish => "page.published",
            Self::Unpublish => "page.unpublished",
            Self::Schedule => "revision.scheduled",
            Self::Unschedule => "revision.unscheduled",
        }
    }
}

impl FromStr for PublicationAction {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUBLISH" => Ok(Self::Publish),
            "UNPUBLISH" => Ok(Self::Unpublish),
            "SCHEDULE" => Ok(Self::Schedule),
            "UNSCHEDULE" => Ok(Self::Unschedule),
            "AUTO_PUBLISH" => Ok(Self::AutoPublish),
            other => Err(StoreError::Corrupt(format!("unknown publication action '{other}'"))),
        }
    }
}

/// Who initiated a publication action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicationSource {
    /// A human acting through the editor.
    Manual,
    /// The batch sweep, via cron endpoint or the interval loop.
    Scheduler,
    /// Lazy release while serving a page.
    System,
}

impl PublicationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "MANUAL",
            Self::Scheduler => "SCHEDULER",
            Self::System => "SYSTEM",
        }
    }
}

impl FromStr for PublicationSource {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANUAL" => Ok(Self::Manual),
            "SCHEDULER" => Ok(Self::Scheduler),
            "SYSTEM" => Ok(Self::System),
            other => Err(StoreError::Corrupt(format!("unknown publication source '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationLogEntry {
    pub id: Uuid,
    pub site_id: Uuid,
    pub page_id: Uuid,
    pub revision_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub action: PublicationAction,
    pub source: PublicationSource,
    pub metadata: Value,
    pub occurred_at: DateTime<Utc>,
}

/// A publication log entry that has not been written yet.
#[derive(Debug, Clone)]
pub struct NewPublicationEntry {
    pub revision_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub action: PublicationAction,
    pub source: PublicationSource,
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewEventType {
    Submitted,
    Approved,
    ChangesRequested,
}

impl ReviewEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Approved => "APPROVED",
            Self::ChangesRequested => "CHANGES_REQUESTED",
        }
    }
}

impl FromStr for ReviewEventType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(Self::Submitted),
            "APPROVED" => Ok(Self::Approved),
            "CHANGES_REQUESTED" => Ok(Self::ChangesRequested),
            other => Err(StoreError::Corrupt(format!("unknown review event type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEvent {
    pub id: Uuid,
    pub site_id: Uuid,
    pub page_id: Uuid,
    pub revision_id: Uuid,
    pub actor_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub event_type: ReviewEventType,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReviewEvent {
    pub actor_id: Option<Uuid>,
    pub event_type: ReviewEventType,
    pub note: Option<String>,
}

/// Site activity feed entry.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: Uuid,
    pub site_id: Uuid,
    pub page_id: Uuid,
    pub revision_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub kind: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub actor_id: Option<Uuid>,
    pub kind: String,
    pub data: Value,
}
