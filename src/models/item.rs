use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::generate_id;

/// A product URL under observation. Unique by `canonical_url` while active;
/// retired rows are kept so snapshot history survives deletion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackedItem {
    pub id: String,
    /// URL exactly as the user entered it.
    pub url: String,
    /// Tracking-stripped dedupe key (see `url_normalizer`).
    pub canonical_url: String,
    pub site_host: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl TrackedItem {
    pub fn new(url: String, canonical_url: String, site_host: String) -> Self {
        Self {
            id: generate_id(),
            url,
            canonical_url,
            site_host,
            active: true,
            created_at: Utc::now(),
        }
    }
}
