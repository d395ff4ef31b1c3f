use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::audit::types::{PublicationAction, PublicationSource};

/// Emitted after a publication action commits. Consumed by the integration dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationEvent {
    pub site_id: Uuid,
    pub page_id: Uuid,
    pub revision_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub action: PublicationAction,
    pub source: PublicationSource,
    /// Same metadata as the publication log entry.
    pub metadata: Value,
    pub occurred_at: DateTime<Utc>,
}
