//! Public operations of the delivery core.

use std::sync::Arc;

use jiff::{SignedDuration, Timestamp};
use validator::Validate;

use crate::config::settings::{DeliveryConfig, SchedulerConfig};
use crate::config::validation::MAX_MESSAGE_LENGTH;
use crate::error::{AppError, AppResult};
use crate::jobs::{JobExecutor, NewScheduledJob, ScheduledJob, ScheduledJobClaimer, TickReport};
use crate::models::{BatchStatus, BatchStatusView, DeliveryBatch, ScheduleRequest, SendRequest};
use crate::repositories::{BatchStore, JobStore, Repositories};
use crate::services::delivery::DeliveryEngine;
use crate::services::gateway::SmsGateway;
use crate::services::orchestrator::{BatchReport, SendOrchestrator};
use crate::services::recipient_service::RecipientService;
use crate::services::suppression_service::{BackfillReport, SuppressionService};
use crate::services::template::MessageTemplate;

/// Page size used when replaying failures over finished batches.
pub const DEFAULT_BACKFILL_BATCH_SIZE: i64 = 500;

#[derive(Clone)]
pub struct DispatchService {
    jobs: Arc<dyn JobStore>,
    batches: Arc<dyn BatchStore>,
    suppressions: SuppressionService,
    orchestrator: SendOrchestrator,
    executor: JobExecutor,
    opt_out_footer: String,
    run_lease: SignedDuration,
}

impl DispatchService {
    pub fn new(
        repos: Repositories,
        gateway: Arc<dyn SmsGateway>,
        scheduler: &SchedulerConfig,
        delivery: &DeliveryConfig,
    ) -> Self {
        let suppressions =
            SuppressionService::new(repos.suppressions.clone(), repos.directory.clone());
        let orchestrator = SendOrchestrator::new(
            repos.batches.clone(),
            RecipientService::new(repos.directory.clone()),
            suppressions.clone(),
            DeliveryEngine::from_config(gateway, delivery),
            delivery.test_phone.clone(),
        );
        let claimer = ScheduledJobClaimer::new(repos.jobs.clone(), scheduler.clone());
        let executor = JobExecutor::new(repos.jobs.clone(), claimer, orchestrator.clone());

        Self {
            jobs: repos.jobs,
            batches: repos.batches,
            suppressions,
            orchestrator,
            executor,
            opt_out_footer: delivery.opt_out_footer.clone(),
            run_lease: scheduler.stale_threshold(),
        }
    }

    pub fn executor(&self) -> JobExecutor {
        self.executor.clone()
    }

    /// Validated template text, with the footer appended when requested.
    fn prepare_message(&self, message: &str, append_footer: bool) -> AppResult<String> {
        let mut template = MessageTemplate::parse(message)?;
        if append_footer {
            template = template.with_footer(&self.opt_out_footer);
        }
        if template.as_str().chars().count() > MAX_MESSAGE_LENGTH {
            return Err(AppError::validation(
                "message",
                format!(
                    "Message with footer exceeds {} characters",
                    MAX_MESSAGE_LENGTH
                ),
            ));
        }
        Ok(template.as_str().to_string())
    }

    pub async fn enqueue_scheduled_job(
        &self,
        request: ScheduleRequest,
        now: Timestamp,
    ) -> AppResult<ScheduledJob> {
        request.validate()?;
        if request.trigger_time <= now {
            return Err(AppError::validation(
                "trigger_time",
                "Trigger time must be in the future",
            ));
        }
        let message = self.prepare_message(&request.message, request.append_opt_out_footer)?;

        let job = self
            .jobs
            .create(
                NewScheduledJob {
                    scheduled_at: request.trigger_time,
                    message_template: message,
                    target: request.target,
                    test_mode: request.test_mode,
                },
                now,
            )
            .await?;

        tracing::info!(
            job_id = job.id,
            scheduled_at = %job.scheduled_at,
            target = %job.target,
            test_mode = job.test_mode,
            "Scheduled job enqueued"
        );
        Ok(job)
    }

    pub async fn send_immediate(&self, request: SendRequest) -> AppResult<BatchReport> {
        request.validate()?;
        let message = self.prepare_message(&request.message, request.append_opt_out_footer)?;

        self.orchestrator
            .execute(&message, request.target, request.test_mode, Timestamp::now())
            .await
    }

    /// Re-runs a `processing` batch, sending only to unrecorded phones. The
    /// caller must win the batch's run lease, which is free after a transient
    /// halt and otherwise lapses after the stale threshold.
    pub async fn resume_batch(&self, batch_id: i64) -> AppResult<BatchReport> {
        let now = Timestamp::now();
        if !self
            .batches
            .claim_run(batch_id, now, now - self.run_lease)
            .await?
        {
            let batch = self.batches.get(batch_id).await?;
            return Err(AppError::invalid_state(if batch.status == BatchStatus::Processing {
                format!("batch {} is being run by another worker", batch_id)
            } else {
                format!("batch {} is {} and cannot be resumed", batch_id, batch.status)
            }));
        }

        let batch = self.batches.get(batch_id).await?;
        tracing::info!(
            batch_id,
            recorded = batch.results.len(),
            "Resuming batch"
        );
        self.orchestrator.run(batch).await
    }

    pub async fn get_batch_status(&self, batch_id: i64) -> AppResult<BatchStatusView> {
        self.batches.status(batch_id).await
    }

    pub async fn get_batch(&self, batch_id: i64) -> AppResult<DeliveryBatch> {
        self.batches.get(batch_id).await
    }

    pub async fn get_scheduled_job(&self, job_id: i64) -> AppResult<ScheduledJob> {
        self.jobs.get(job_id).await
    }

    /// Cancels a job that has not been claimed yet.
    pub async fn cancel_scheduled_job(&self, job_id: i64, now: Timestamp) -> AppResult<ScheduledJob> {
        if !self.jobs.cancel(job_id, now).await? {
            let job = self.jobs.get(job_id).await?;
            return Err(AppError::invalid_state(format!(
                "job {} is {} and can no longer be cancelled",
                job_id, job.status
            )));
        }
        tracing::info!(job_id, "Scheduled job cancelled");
        self.jobs.get(job_id).await
    }

    pub async fn run_scheduler_tick(&self, now: Timestamp) -> AppResult<TickReport> {
        self.executor.run_tick(now).await
    }

    pub async fn backfill_suppressions(&self, batch_size: i64) -> AppResult<BackfillReport> {
        self.suppressions
            .backfill(self.batches.as_ref(), batch_size, Timestamp::now())
            .await
    }
}
