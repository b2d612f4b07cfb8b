//! Handlers for the delivery commands: enqueue, send, resume, status,
//! cancel and backfill.

use jiff::Timestamp;
use serde::Serialize;

use crate::cli::parser::MessageArgs;
use crate::error::AppResult;
use crate::jobs::ScheduledJob;
use crate::models::{BatchStatusView, DeliveryBatch, ScheduleRequest, SendRequest};
use crate::services::{BackfillReport, BatchReport, DispatchService};

/// What `status` prints, depending on its flags.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StatusReport {
    Batch(BatchStatusView),
    BatchWithResults(DeliveryBatch),
    Job(ScheduledJob),
}

pub struct DispatchCommandHandler {
    service: DispatchService,
}

impl DispatchCommandHandler {
    pub fn new(service: DispatchService) -> Self {
        Self { service }
    }

    pub async fn enqueue(&self, message: &MessageArgs, at: Timestamp) -> AppResult<ScheduledJob> {
        let request = ScheduleRequest {
            message: message.text.clone(),
            target: message.target,
            trigger_time: at,
            test_mode: message.test_mode,
            append_opt_out_footer: message.footer,
        };
        self.service
            .enqueue_scheduled_job(request, Timestamp::now())
            .await
    }

    pub async fn send(&self, message: &MessageArgs) -> AppResult<BatchReport> {
        let request = SendRequest {
            message: message.text.clone(),
            target: message.target,
            test_mode: message.test_mode,
            append_opt_out_footer: message.footer,
        };
        self.service.send_immediate(request).await
    }

    pub async fn resume(&self, batch_id: i64) -> AppResult<BatchReport> {
        self.service.resume_batch(batch_id).await
    }

    pub async fn status(&self, id: i64, job: bool, results: bool) -> AppResult<StatusReport> {
        Ok(match (job, results) {
            (true, _) => StatusReport::Job(self.service.get_scheduled_job(id).await?),
            (false, true) => StatusReport::BatchWithResults(self.service.get_batch(id).await?),
            (false, false) => StatusReport::Batch(self.service.get_batch_status(id).await?),
        })
    }

    pub async fn cancel(&self, job_id: i64) -> AppResult<ScheduledJob> {
        self.service
            .cancel_scheduled_job(job_id, Timestamp::now())
            .await
    }

    pub async fn backfill(&self, batch_size: i64) -> AppResult<BackfillReport> {
        self.service.backfill_suppressions(batch_size).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use jiff::SignedDuration;

    use super::*;
    use crate::config::SchedulerConfig;
    use crate::error::AppError;
    use crate::jobs::JobStatus;
    use crate::models::{BatchStatus, Target};
    use crate::repositories::MemoryStore;
    use crate::services::testing::{ScriptedGateway, delivery_config, memory_repositories};

    fn handler() -> (Arc<MemoryStore>, Arc<ScriptedGateway>, DispatchCommandHandler) {
        let (store, repos) = memory_repositories();
        let gateway = Arc::new(ScriptedGateway::new());
        let service = DispatchService::new(
            repos,
            gateway.clone(),
            &SchedulerConfig::default(),
            &delivery_config(),
        );
        store.add_member("+15552220001", Some("Cara Diaz"));
        (store, gateway, DispatchCommandHandler::new(service))
    }

    fn message(text: &str) -> MessageArgs {
        MessageArgs {
            text: text.to_string(),
            target: Target::Community,
            test_mode: false,
            footer: false,
        }
    }

    #[tokio::test]
    async fn test_send_then_status() {
        let (_store, gateway, handler) = handler();

        let report = handler.send(&message("Hi {first_name}")).await.unwrap();
        assert_eq!(report.status, BatchStatus::Sent);
        assert_eq!(gateway.sent_bodies(), vec!["Hi Cara"]);

        let StatusReport::Batch(view) = handler.status(report.batch_id, false, false).await.unwrap()
        else {
            panic!("expected batch status");
        };
        assert_eq!((view.total, view.success_count), (1, 1));

        let StatusReport::BatchWithResults(batch) =
            handler.status(report.batch_id, false, true).await.unwrap()
        else {
            panic!("expected batch with results");
        };
        assert_eq!(batch.results.len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_status_and_cancel() {
        let (_store, _gateway, handler) = handler();
        let at = Timestamp::now() + SignedDuration::from_hours(2);

        let job = handler.enqueue(&message("Later"), at).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let StatusReport::Job(seen) = handler.status(job.id, true, false).await.unwrap() else {
            panic!("expected job status");
        };
        assert_eq!(seen.id, job.id);

        let cancelled = handler.cancel(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        let again = handler.cancel(job.id).await.unwrap_err();
        assert!(matches!(again, AppError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_enqueue_in_the_past_rejected() {
        let (_store, _gateway, handler) = handler();
        let at = Timestamp::now() - SignedDuration::from_mins(1);

        let err = handler.enqueue(&message("Too late"), at).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "trigger_time"));
    }

    #[tokio::test]
    async fn test_unknown_batch_is_not_found() {
        let (_store, _gateway, handler) = handler();
        let err = handler.resume(999).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_backfill_over_empty_store() {
        let (_store, _gateway, handler) = handler();
        let report = handler.backfill(50).await.unwrap();
        assert_eq!(report.batches, 0);
    }
}
