//! Exactly-once claiming of due scheduled jobs.
//!
//! Every worker runs the same scan independently. Correctness rests on the
//! store's compare-and-swap from `pending` to `processing`: a job is claimed
//! by whichever statement changes its row first.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use rand::Rng;

use crate::config::settings::SchedulerConfig;
use crate::error::AppResult;
use crate::jobs::models::ScheduledJob;
use crate::jobs::types::{ClaimFailure, JobStatus};
use crate::repositories::JobStore;

/// Result of one claim scan: at most one job won by this worker, plus the
/// claim errors hit on the way to it.
#[derive(Debug, Default)]
pub struct NextClaim {
    pub job: Option<ScheduledJob>,
    pub failures: Vec<ClaimFailure>,
}

#[derive(Clone)]
pub struct ScheduledJobClaimer {
    jobs: Arc<dyn JobStore>,
    config: SchedulerConfig,
}

impl ScheduledJobClaimer {
    pub fn new(jobs: Arc<dyn JobStore>, config: SchedulerConfig) -> Self {
        Self { jobs, config }
    }

    /// Fails every `processing` job whose claim is strictly older than the
    /// stale threshold.
    pub async fn reclaim_stale(&self, now: Timestamp) -> AppResult<Vec<i64>> {
        let threshold = self.config.stale_threshold();
        let cutoff = now - threshold;
        let reason = format!(
            "Processing exceeded {} minutes; presumed abandoned",
            self.config.stale_after_minutes
        );

        let reclaimed = self.jobs.reclaim_stale(cutoff, now, &reason).await?;
        if !reclaimed.is_empty() {
            tracing::warn!(count = reclaimed.len(), job_ids = ?reclaimed, "Reclaimed stale jobs");
        }
        Ok(reclaimed)
    }

    /// Claims the oldest due pending job that is not in `passed`. Jobs won
    /// by another worker are skipped; contention that outlasts the retry
    /// limit is reported per job and the scan moves on to the next one.
    pub async fn claim_next(
        &self,
        now: Timestamp,
        passed: &HashSet<i64>,
    ) -> AppResult<NextClaim> {
        let due = self.jobs.find_due(now).await?;
        let mut next = NextClaim::default();

        for mut job in due.into_iter().filter(|job| !passed.contains(&job.id)) {
            match self.claim_with_retry(job.id, now).await {
                Ok(true) => {
                    tracing::debug!(job_id = job.id, "Claimed scheduled job");
                    job.status = JobStatus::Processing;
                    job.processing_started_at = Some(now);
                    next.job = Some(job);
                    break;
                }
                Ok(false) => {
                    tracing::trace!(job_id = job.id, "Job claimed by another worker");
                }
                Err(e) => {
                    tracing::warn!(job_id = job.id, error = %e, "Failed to claim job");
                    next.failures.push(ClaimFailure {
                        job_id: job.id,
                        error: e.reason(),
                    });
                }
            }
        }

        Ok(next)
    }

    pub fn is_expired(&self, job: &ScheduledJob, now: Timestamp) -> bool {
        now.duration_since(job.scheduled_at) > self.config.max_lag()
    }

    /// Finalizes a claimed job to `expired` when it is past the max lag.
    /// Returns whether the job expired.
    pub async fn check_expiry(&self, job: &ScheduledJob, now: Timestamp) -> AppResult<bool> {
        if !self.is_expired(job, now) {
            return Ok(false);
        }

        let reason = format!(
            "Scheduled time {} is more than {} minutes in the past",
            job.scheduled_at, self.config.max_lag_minutes
        );
        if self
            .jobs
            .finish(job.id, JobStatus::Expired, Some(&reason), now)
            .await?
        {
            tracing::info!(job_id = job.id, scheduled_at = %job.scheduled_at, "Scheduled job expired");
        }
        Ok(true)
    }

    async fn claim_with_retry(&self, job_id: i64, now: Timestamp) -> AppResult<bool> {
        let mut attempt = 0;
        loop {
            match self.jobs.try_claim(job_id, now).await {
                Err(e) if e.is_retryable_contention() && attempt < self.config.claim_retry_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::debug!(job_id, attempt, ?delay, "Claim contention, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Exponential backoff with up to one base interval of random jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.claim_retry_backoff();
        let exponential = base.saturating_mul(1u32 << attempt.min(10));
        let jitter_ms = rand::rng().random_range(0..=base.as_millis() as u64);
        exponential + Duration::from_millis(jitter_ms)
    }
}
