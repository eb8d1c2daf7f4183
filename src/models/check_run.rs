use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::{generate_id, CheckStatus};

/// One row per check attempt. Created in the FAILED state before any I/O so
/// a crash mid-run leaves a visible failure, then promoted on finalization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckRun {
    pub id: String,
    pub item_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: CheckStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub used_playwright: bool,
    pub used_ai: bool,
    pub token_input: Option<i64>,
    pub token_output: Option<i64>,
    pub estimated_cost_usd: Option<f64>,
}

impl CheckRun {
    /// Pessimistic sentinel: a run that never finalizes stays FAILED.
    pub fn begin(item_id: String) -> Self {
        Self {
            id: generate_id(),
            item_id,
            started_at: Utc::now(),
            finished_at: None,
            status: CheckStatus::Failed,
            error_code: None,
            error_message: None,
            used_playwright: false,
            used_ai: false,
            token_input: None,
            token_output: None,
            estimated_cost_usd: None,
        }
    }
}

/// Finalization payload applied to a run row once the check settles.
#[derive(Debug, Clone, Default)]
pub struct CheckRunOutcome {
    pub status: CheckStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub used_playwright: bool,
    pub used_ai: bool,
    pub token_input: Option<i64>,
    pub token_output: Option<i64>,
    pub estimated_cost_usd: Option<f64>,
}

impl Default for CheckStatus {
    fn default() -> Self {
        CheckStatus::Failed
    }
}
