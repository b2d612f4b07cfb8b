//! Handlers for `tick` and `worker`.

use jiff::Timestamp;
use tokio_util::sync::CancellationToken;

use crate::error::AppResult;
use crate::jobs::{DevPoller, TickReport};
use crate::services::DispatchService;

pub struct SchedulerCommandHandler {
    service: DispatchService,
}

impl SchedulerCommandHandler {
    pub fn new(service: DispatchService) -> Self {
        Self { service }
    }

    /// One pass of reclaim, claim and execute.
    pub async fn tick(&self) -> AppResult<TickReport> {
        self.service.run_scheduler_tick(Timestamp::now()).await
    }

    /// Polls on `cron` until Ctrl-C or until `shutdown` is cancelled elsewhere.
    pub async fn worker(&self, cron: &str, shutdown: CancellationToken) -> AppResult<()> {
        let signal = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                    }
                    signal.cancel();
                }
                _ = signal.cancelled() => {}
            }
        });

        DevPoller::new(self.service.executor(), cron)
            .await?
            .run(shutdown)
            .await
    }
}
