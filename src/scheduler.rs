use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::sweep::DailySweep;
use crate::utils::error::{AppError, Result};

/// Cron trigger for the daily sweep. One job, one schedule; overlapping
/// sweeps are tolerated because all shared state lives in the store.
pub struct SweepScheduler {
    scheduler: JobScheduler,
    sweep: Arc<DailySweep>,
    cron: String,
}

impl SweepScheduler {
    pub async fn new(sweep: Arc<DailySweep>, cron: &str) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Internal(format!("scheduler init failed: {e}")))?;

        Ok(Self {
            scheduler,
            sweep,
            cron: cron.to_string(),
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        let sweep = Arc::clone(&self.sweep);
        let schedule = with_seconds_field(&self.cron);

        let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
            let sweep = Arc::clone(&sweep);
            Box::pin(async move {
                if let Err(e) = sweep.run().await {
                    error!(error = %e, "scheduled sweep failed");
                }
            })
        })
        .map_err(|e| AppError::Internal(format!("invalid sweep schedule: {e}")))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Internal(format!("failed to register sweep job: {e}")))?;
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::Internal(format!("scheduler start failed: {e}")))?;

        info!(schedule = %self.cron, "sweep scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::Internal(format!("scheduler shutdown failed: {e}")))?;
        info!("sweep scheduler shutdown");
        Ok(())
    }
}

/// The scheduler library wants a seconds field; standard 5-field crontab
/// expressions get one prepended.
fn with_seconds_field(cron: &str) -> String {
    if cron.split_whitespace().count() == 5 {
        format!("0 {cron}")
    } else {
        cron.to_string()
    }
}
