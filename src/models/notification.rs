use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::{generate_id, EventType};

/// One row per `(item_id, snapshot_id, event_type)`. The unique composite
/// key is the concurrency primitive: inserting the row claims the event,
/// and only the claimant performs the webhook POST.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub item_id: String,
    pub snapshot_id: String,
    pub event_type: EventType,
    pub webhook_status: Option<i64>,
    pub webhook_response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn claim(item_id: String, snapshot_id: String, event_type: EventType) -> Self {
        Self {
            id: generate_id(),
            item_id,
            snapshot_id,
            event_type,
            webhook_status: None,
            webhook_response: None,
            created_at: Utc::now(),
            sent_at: None,
        }
    }
}

/// Webhook responses are stored truncated so a misbehaving endpoint cannot
/// bloat the table.
pub const WEBHOOK_RESPONSE_MAX_CHARS: usize = 1000;

pub fn truncate_webhook_response(body: &str) -> String {
    body.chars().take(WEBHOOK_RESPONSE_MAX_CHARS).collect()
}
