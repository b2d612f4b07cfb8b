//! Development poller: runs scheduler ticks on a cron schedule inside one
//! process. Production deployments invoke a single tick per run instead.

use std::sync::Arc;

use jiff::Timestamp;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::jobs::executor::JobExecutor;

pub struct DevPoller {
    scheduler: JobScheduler,
    executor: Arc<JobExecutor>,
    cron: String,
}

impl DevPoller {
    pub async fn new(executor: JobExecutor, cron: &str) -> AppResult<Self> {
        let scheduler = JobScheduler::new().await.map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;

        Ok(Self {
            scheduler,
            executor: Arc::new(executor),
            cron: cron.to_string(),
        })
    }

    /// Registers the tick job and blocks until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) -> AppResult<()> {
        let executor = Arc::clone(&self.executor);
        let tick = Job::new_async(self.cron.as_str(), move |_uuid, _lock| {
            let executor = Arc::clone(&executor);
            Box::pin(async move {
                match executor.run_tick(Timestamp::now()).await {
                    Ok(report) => tracing::debug!(
                        tick_id = %report.tick_id,
                        claimed = report.claimed.len(),
                        "Poll tick complete"
                    ),
                    Err(e) => tracing::error!(error = %e, "Poll tick failed"),
                }
            })
        })
        .map_err(|e| AppError::validation("scheduler.poll_cron", format!("Invalid cron expression: {}", e)))?;

        self.scheduler.add(tick).await.map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;
        self.scheduler.start().await.map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;
        tracing::info!(cron = %self.cron, "Development poller started");

        shutdown.cancelled().await;

        tracing::info!("Stopping development poller");
        self.scheduler.shutdown().await.map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;
        Ok(())
    }
}
