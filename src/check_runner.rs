use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::extract::{reason, AttemptStatus, ExtractOptions, ExtractionAttempt, Extractor};
use crate::models::{
    CheckRun, CheckRunOutcome, CheckStatus, NewPriceSnapshot, PriceSnapshot, TrackedItem,
};
use crate::notifier::Notifier;
use crate::store::Store;
use crate::utils::error::{AppError, Result};

/// Error code recorded when the runner itself blows up.
const CHECK_RUN_FAILED: &str = "CHECK_RUN_FAILED";

/// Review reasons that indicate a diagnostic fault rather than an
/// infrastructural one.
const REVIEW_REASONS: [&str; 4] = [
    "AI_BUDGET",
    "LOW_CONFIDENCE",
    "REGIONAL_REDIRECT",
    "REDIRECT_BLOCKED",
];

const MAX_AI_HINTS: i64 = 4;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub item_id: String,
    pub run_id: String,
    pub status: CheckStatus,
    pub error_code: Option<String>,
    pub snapshot_id: Option<String>,
    pub price_changed: bool,
    pub back_in_stock: bool,
}

/// Per-item state machine: every check gets a durable run row before any
/// I/O, the extraction happens with the daily model budget enforced, and a
/// snapshot plus notifications are only produced from a successful,
/// finalized extraction.
pub struct CheckRunner {
    store: Store,
    extractor: Arc<dyn Extractor>,
    notifier: Arc<Notifier>,
    config: AppConfig,
}

impl CheckRunner {
    pub fn new(
        store: Store,
        extractor: Arc<dyn Extractor>,
        notifier: Arc<Notifier>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            notifier,
            config,
        }
    }

    pub async fn run_check_for_item(&self, item_id: &str) -> Result<CheckResult> {
        let item = self
            .store
            .get_active_item(item_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource: format!("active item {item_id}"),
            })?;

        // Durable sentinel: stays FAILED if anything below never finalizes
        let run = CheckRun::begin(item.id.clone());
        self.store.insert_check_run(&run).await?;

        match self.execute(&item, &run).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(item_id = %item.id, run_id = %run.id, error = %e, "check run failed");
                let outcome = CheckRunOutcome {
                    status: CheckStatus::Failed,
                    error_code: Some(CHECK_RUN_FAILED.to_string()),
                    error_message: Some(e.to_string()),
                    ..Default::default()
                };
                self.store
                    .finalize_check_run(&run.id, &outcome, Utc::now())
                    .await?;

                Ok(CheckResult {
                    item_id: item.id.clone(),
                    run_id: run.id.clone(),
                    status: CheckStatus::Failed,
                    error_code: Some(CHECK_RUN_FAILED.to_string()),
                    snapshot_id: None,
                    price_changed: false,
                    back_in_stock: false,
                })
            }
        }
    }

    async fn execute(&self, item: &TrackedItem, run: &CheckRun) -> Result<CheckResult> {
        let remaining_budget = self.remaining_ai_budget().await?;
        let ai_hints = self.collect_hints(item).await?;

        let opts = ExtractOptions {
            timeout_ms: self.config.scrape_timeout_ms,
            allow_playwright: self.config.playwright_enabled(),
            allow_ai: remaining_budget > 0.0,
            model: self.config.openai_model_small.clone(),
            ai_hints,
        };

        let attempt = self.extractor.extract(&item.url, &opts).await?;

        match attempt.status {
            AttemptStatus::NeedsReview => self.finish_review(item, run, attempt).await,
            AttemptStatus::Success => self.finish_success(item, run, attempt).await,
        }
    }

    async fn finish_review(
        &self,
        item: &TrackedItem,
        run: &CheckRun,
        attempt: ExtractionAttempt,
    ) -> Result<CheckResult> {
        let review_reason = attempt
            .reason
            .clone()
            .unwrap_or_else(|| reason::UNKNOWN_EXTRACTION_ERROR.to_string());

        let status = if REVIEW_REASONS.iter().any(|r| review_reason.contains(r)) {
            CheckStatus::NeedsReview
        } else {
            CheckStatus::Failed
        };

        info!(
            item_id = %item.id,
            run_id = %run.id,
            reason = %review_reason,
            ?status,
            "check finished without snapshot"
        );

        let outcome = CheckRunOutcome {
            status,
            error_code: Some(review_reason.clone()),
            error_message: attempt.reason,
            used_playwright: attempt.used_playwright,
            used_ai: attempt.used_ai,
            token_input: attempt.token_input,
            token_output: attempt.token_output,
            estimated_cost_usd: attempt.estimated_cost_usd,
        };
        self.store
            .finalize_check_run(&run.id, &outcome, Utc::now())
            .await?;

        Ok(CheckResult {
            item_id: item.id.clone(),
            run_id: run.id.clone(),
            status,
            error_code: Some(review_reason),
            snapshot_id: None,
            price_changed: false,
            back_in_stock: false,
        })
    }

    async fn finish_success(
        &self,
        item: &TrackedItem,
        run: &CheckRun,
        attempt: ExtractionAttempt,
    ) -> Result<CheckResult> {
        let result = attempt
            .result
            .as_ref()
            .ok_or_else(|| AppError::Extraction(reason::UNKNOWN_EXTRACTION_ERROR.to_string()))?;

        let previous = self.store.latest_snapshot(&item.id).await?;

        let snapshot = PriceSnapshot::new(NewPriceSnapshot {
            item_id: item.id.clone(),
            product_name: result
                .product_name
                .clone()
                .unwrap_or_else(|| "Unknown product".to_string()),
            price_cents: result.price_cents,
            in_stock: result.in_stock,
            stock_state: result.stock_state,
            extraction_method: result.method,
            confidence: result.confidence,
            evidence_json: serde_json::to_string(&result.evidence)?,
            content_hash: result.content_hash.clone(),
        });
        self.store.insert_snapshot(&snapshot).await?;

        let price_changed = matches!(
            (
                previous.as_ref().and_then(|p| p.price_cents),
                snapshot.price_cents
            ),
            (Some(old), Some(new)) if old != new
        );
        let back_in_stock = previous.as_ref().map(|p| p.in_stock) == Some(Some(false))
            && snapshot.in_stock == Some(true);

        if price_changed {
            let old_price = previous.as_ref().and_then(|p| p.price_cents);
            self.notifier
                .notify_price_change(item, &snapshot, old_price)
                .await?;
        }
        if back_in_stock {
            self.notifier.notify_back_in_stock(item, &snapshot).await?;
        }

        let outcome = CheckRunOutcome {
            status: CheckStatus::Success,
            error_code: None,
            error_message: None,
            used_playwright: attempt.used_playwright,
            used_ai: attempt.used_ai,
            token_input: attempt.token_input,
            token_output: attempt.token_output,
            estimated_cost_usd: attempt.estimated_cost_usd,
        };
        self.store
            .finalize_check_run(&run.id, &outcome, Utc::now())
            .await?;

        info!(
            item_id = %item.id,
            run_id = %run.id,
            snapshot_id = %snapshot.id,
            price_changed,
            back_in_stock,
            "check succeeded"
        );

        Ok(CheckResult {
            item_id: item.id.clone(),
            run_id: run.id.clone(),
            status: CheckStatus::Success,
            error_code: None,
            snapshot_id: Some(snapshot.id),
            price_changed,
            back_in_stock,
        })
    }

    /// Daily budget minus today's aggregated spend, floored at zero. The
    /// aggregate is read per run, so concurrent sweeps can overshoot by at
    /// most concurrency x per-call cost.
    async fn remaining_ai_budget(&self) -> Result<f64> {
        let today_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc();
        let spent = self.store.ai_spend_since(today_start).await?;
        Ok((self.config.ai_daily_budget_usd - spent).max(0.0))
    }

    async fn collect_hints(&self, item: &TrackedItem) -> Result<Vec<String>> {
        let snapshots = self
            .store
            .recent_host_snapshots(&item.site_host, &item.id, MAX_AI_HINTS)
            .await?;

        Ok(snapshots
            .iter()
            .map(|s| {
                format!(
                    "{} | price={} | stock={}",
                    s.product_name,
                    s.price_cents
                        .map(|c| format!("{}.{:02}", c / 100, c % 100))
                        .unwrap_or_else(|| "?".to_string()),
                    serde_json::to_value(s.stock_state)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_else(|| "UNKNOWN".to_string()),
                )
            })
            .collect())
    }
}
