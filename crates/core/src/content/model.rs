use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;

/// Workflow status of a single revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevisionStatus {
    Draft,
    Review,
    Scheduled,
    Published,
}

impl RevisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Review => "REVIEW",
            Self::Scheduled => "SCHEDULED",
            Self::Published => "PUBLISHED",
        }
    }

    /// Page-level status a page takes when this revision was the last one mutated.
    pub fn page_status(&self) -> PageStatus {
        match self {
            Self::Draft => PageStatus::Draft,
            Self::Review => PageStatus::Review,
            Self::Scheduled => PageStatus::Scheduled,
            Self::Published => PageStatus::Published,
        }
    }
}

impl fmt::Display for RevisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevisionStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "REVIEW" => Ok(Self::Review),
            "SCHEDULED" => Ok(Self::Scheduled),
            "PUBLISHED" => Ok(Self::Published),
            other => Err(StoreError::Corrupt(format!("unknown revision status '{other}'"))),
        }
    }
}

/// Denormalized page status. `Archived` is only ever set outside the workflow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageStatus {
    Draft,
    Review,
    Scheduled,
    Published,
    Archived,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Review => "REVIEW",
            Self::Scheduled => "SCHEDULED",
            Self::Published => "PUBLISHED",
            Self::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "REVIEW" => Ok(Self::Review),
            "SCHEDULED" => Ok(Self::Scheduled),
            "PUBLISHED" => Ok(Self::Published),
            "ARCHIVED" => Ok(Self::Archived),
            other => Err(StoreError::Corrupt(format!("unknown page status '{other}'"))),
        }
    }
}

/// A site hosting pages. Maps to the `sites` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    /// IANA zone used when a schedule request carries none.
    pub timezone: String,
}

/// A content destination at a unique `(site, path)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: Uuid,
    pub site_id: Uuid,
    pub path: String,
    pub title: String,
    pub status: PageStatus,
    pub published_at: Option<DateTime<Utc>>,
    /// Metadata projected from the last published revision.
    pub meta: Value,
    pub updated_at: DateTime<Utc>,
}

/// One structured content unit within a revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
    pub kind: String,
    pub sort_order: i32,
    pub data: Value,
    #[serde(default)]
    pub settings: Value,
}

/// Immutable content snapshot plus its mutable workflow envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub id: Uuid,
    pub page_id: Uuid,
    pub site_id: Uuid,
    pub author_id: Option<Uuid>,
    pub summary: Option<String>,
    pub meta: Value,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub workflow: RevisionWorkflow,
    pub blocks: Vec<ContentBlock>,
}

impl Revision {
    pub fn status(&self) -> RevisionStatus {
        self.workflow.status
    }

    /// Whether the revision is scheduled and its time has come.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.workflow.status == RevisionStatus::Scheduled
            && self.workflow.scheduled_for.is_some_and(|at| at <= now)
    }
}

/// The mutable part of a revision. Transitions replace it as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionWorkflow {
    pub status: RevisionStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub scheduled_timezone: Option<String>,
    pub scheduled_by_id: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by_id: Option<Uuid>,
    pub published_at: Option<DateTime<Utc>>,
}

impl RevisionWorkflow {
    pub fn draft() -> Self {
        Self {
            status: RevisionStatus::Draft,
            scheduled_for: None,
            scheduled_timezone: None,
            scheduled_by_id: None,
            reviewed_at: None,
            reviewed_by_id: None,
            published_at: None,
        }
    }

    pub fn clear_schedule(&mut self) {
        self.scheduled_for = None;
        self.scheduled_timezone = None;
        self.scheduled_by_id = None;
    }

    pub fn clear_review(&mut self) {
        self.reviewed_at = None;
        self.reviewed_by_id = None;
    }
}

/// Input for creating a new DRAFT revision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRevision {
    pub author_id: Option<Uuid>,
    pub summary: Option<String>,
    #[serde(default)]
    pub meta: Value,
    #[serde(default)]
    pub blocks: Vec<ContentBlock>,
}
