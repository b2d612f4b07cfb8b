//! One scheduler tick: reclaim, claim one job and run it, until nothing due
//! is left.

use std::collections::HashSet;
use std::sync::Arc;

use jiff::{SignedDuration, Timestamp};
use tokio::time::Instant;
use tracing::Instrument;

use crate::error::AppResult;
use crate::jobs::claimer::ScheduledJobClaimer;
use crate::jobs::models::ScheduledJob;
use crate::jobs::types::{JobOutcome, JobStatus, TickReport};
use crate::models::BatchStatus;
use crate::repositories::JobStore;
use crate::services::orchestrator::SendOrchestrator;

#[derive(Clone)]
pub struct JobExecutor {
    jobs: Arc<dyn JobStore>,
    claimer: ScheduledJobClaimer,
    orchestrator: SendOrchestrator,
}

impl JobExecutor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        claimer: ScheduledJobClaimer,
        orchestrator: SendOrchestrator,
    ) -> Self {
        Self {
            jobs,
            claimer,
            orchestrator,
        }
    }

    /// Stateless tick; safe to run concurrently from any number of workers.
    pub async fn run_tick(&self, now: Timestamp) -> AppResult<TickReport> {
        let report = TickReport::new();
        let span = tracing::info_span!("scheduler_tick", tick_id = %report.tick_id);
        self.tick(report, now).instrument(span).await
    }

    async fn tick(&self, mut report: TickReport, now: Timestamp) -> AppResult<TickReport> {
        let started = Instant::now();
        let mut passed = HashSet::new();

        loop {
            // Stamped with the time of the claim, not the start of the tick.
            let claim_time = elapsed_since(now, started);
            report
                .reclaimed
                .extend(self.claimer.reclaim_stale(claim_time).await?);

            let next = self.claimer.claim_next(claim_time, &passed).await?;
            passed.extend(next.failures.iter().map(|failure| failure.job_id));
            report.claim_failures.extend(next.failures);
            let Some(job) = next.job else {
                break;
            };

            let job_id = job.id;
            report.claimed.push(job_id);
            match self.execute_job(job, claim_time).await {
                Ok(outcome) => report.outcomes.push((job_id, outcome)),
                // The job stays processing until a later stale scan fails it.
                Err(e) => tracing::error!(job_id, error = %e, "Scheduled job interrupted"),
            }
        }

        tracing::info!(
            reclaimed = report.reclaimed.len(),
            claimed = report.claimed.len(),
            claim_failures = report.claim_failures.len(),
            "Scheduler tick finished"
        );
        Ok(report)
    }

    /// Runs one claimed job to a terminal state. Storage errors while
    /// finishing the job propagate; the stale scan recovers such jobs.
    pub async fn execute_job(&self, job: ScheduledJob, now: Timestamp) -> AppResult<JobOutcome> {
        if self.claimer.check_expiry(&job, now).await? {
            return Ok(JobOutcome::Expired);
        }

        let batch = match self
            .orchestrator
            .create_batch(&job.message_template, job.target, job.test_mode, now)
            .await
        {
            Ok(batch) => batch,
            Err(e) => return self.fail(&job, None, e.reason()).await,
        };
        let batch_id = batch.id;
        if !self.jobs.attach_batch(job.id, batch_id).await? {
            self.orchestrator
                .discard(batch_id, "Scheduled job left processing before sending")
                .await?;
            return Ok(self.superseded(&job, Some(batch_id)));
        }
        tracing::info!(job_id = job.id, batch_id, "Running scheduled job");

        match self.orchestrator.run(batch).await {
            Ok(report) if report.halted.is_some() => {
                let reason = report
                    .halted
                    .map(|halt| {
                        format!(
                            "Transient gateway failure at recipient {}: {}; batch {} left resumable",
                            halt.index, halt.error, batch_id
                        )
                    })
                    .unwrap_or_default();
                self.fail(&job, Some(batch_id), reason).await
            }
            Ok(report) => {
                // Per-recipient failures live in the batch counts; the job
                // itself completed.
                if report.status == BatchStatus::Failed {
                    tracing::info!(
                        job_id = job.id,
                        batch_id,
                        failure_count = report.failure_count,
                        "Scheduled job sent with failures"
                    );
                }
                if self
                    .jobs
                    .finish(job.id, JobStatus::Sent, None, Timestamp::now())
                    .await?
                {
                    Ok(JobOutcome::Sent { batch_id })
                } else {
                    Ok(self.superseded(&job, Some(batch_id)))
                }
            }
            Err(e) => self.fail(&job, Some(batch_id), e.reason()).await,
        }
    }

    async fn fail(
        &self,
        job: &ScheduledJob,
        batch_id: Option<i64>,
        reason: String,
    ) -> AppResult<JobOutcome> {
        tracing::warn!(job_id = job.id, batch_id, %reason, "Scheduled job failed");
        if self
            .jobs
            .finish(job.id, JobStatus::Failed, Some(&reason), Timestamp::now())
            .await?
        {
            Ok(JobOutcome::Failed { batch_id, reason })
        } else {
            Ok(self.superseded(job, batch_id))
        }
    }

    fn superseded(&self, job: &ScheduledJob, batch_id: Option<i64>) -> JobOutcome {
        tracing::warn!(job_id = job.id, batch_id, "Job left processing before it finished");
        JobOutcome::Superseded { batch_id }
    }
}

/// `now` advanced by the time elapsed since `started`.
fn elapsed_since(now: Timestamp, started: Instant) -> Timestamp {
    SignedDuration::try_from(started.elapsed())
        .ok()
        .and_then(|elapsed| now.checked_add(elapsed).ok())
        .unwrap_or(now)
}
