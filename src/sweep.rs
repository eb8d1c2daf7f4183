use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::check_runner::CheckRunner;
use crate::models::CheckStatus;
use crate::store::Store;
use crate::utils::error::Result;

/// Upper bound on items per sweep; anything beyond waits for the next one.
const MAX_ITEMS_PER_SWEEP: i64 = 200;
/// Items loaded into flight bookkeeping at a time.
const BATCH_SIZE: usize = 25;
/// In-flight checks across the whole sweep.
const CONCURRENT_CHECKS: usize = 3;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub total: usize,
    pub succeeded: usize,
    pub needs_review: usize,
    pub failed: usize,
}

/// Fans the check runner out over all active items: sequential batches,
/// concurrent checks within a batch behind a global semaphore. There is no
/// per-item retry; failures live in their run rows and surface in the UI.
pub struct DailySweep {
    store: Store,
    runner: Arc<CheckRunner>,
}

impl DailySweep {
    pub fn new(store: Store, runner: Arc<CheckRunner>) -> Self {
        Self { store, runner }
    }

    pub async fn run(&self) -> Result<SweepSummary> {
        let items = self.store.list_active_items(MAX_ITEMS_PER_SWEEP).await?;
        info!(items = items.len(), "daily sweep starting");

        let semaphore = Arc::new(Semaphore::new(CONCURRENT_CHECKS));
        let mut summary = SweepSummary {
            total: items.len(),
            ..Default::default()
        };

        for batch in items.chunks(BATCH_SIZE) {
            let handles: Vec<_> = batch
                .iter()
                .map(|item| {
                    let runner = Arc::clone(&self.runner);
                    let semaphore = Arc::clone(&semaphore);
                    let item_id = item.id.clone();

                    tokio::spawn(async move {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .expect("sweep semaphore never closes");
                        runner.run_check_for_item(&item_id).await
                    })
                })
                .collect();

            for handle in handles {
                match handle.await {
                    Ok(Ok(result)) => match result.status {
                        CheckStatus::Success => summary.succeeded += 1,
                        CheckStatus::NeedsReview => summary.needs_review += 1,
                        CheckStatus::Failed => summary.failed += 1,
                    },
                    Ok(Err(e)) => {
                        warn!(error = %e, "check errored during sweep");
                        summary.failed += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, "check task panicked during sweep");
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            needs_review = summary.needs_review,
            failed = summary.failed,
            "daily sweep finished"
        );
        Ok(summary)
    }
}
