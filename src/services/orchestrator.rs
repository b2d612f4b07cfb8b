//! Drives one delivery batch from recipient resolution to finalization.

use std::sync::Arc;

use futures::StreamExt;
use jiff::Timestamp;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::{
    BatchStatus, DeliveryBatch, NewDeliveryBatch, RecipientCandidate, Target,
};
use crate::repositories::BatchStore;
use crate::services::delivery::{BatchEvent, DeliveryEngine, OutboundMessage, TransientHalt};
use crate::services::recipient_service::RecipientService;
use crate::services::suppression_service::{FailureSummary, SuppressionService};
use crate::services::template::MessageTemplate;

/// Display name used for the single test-mode destination.
pub const TEST_RECIPIENT_NAME: &str = "Admin Test";

/// What a single orchestrator run did to its batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batch_id: i64,
    pub status: BatchStatus,
    pub total: i32,
    pub success_count: i32,
    pub failure_count: i32,
    /// Candidates returned by the resolver
    pub resolved: usize,
    pub skipped_opt_out: usize,
    pub skipped_hard_fail: usize,
    /// Candidates already recorded in the batch by an earlier run
    pub skipped_recorded: usize,
    /// Messages sent during this run
    pub sent: usize,
    pub failures: Option<FailureSummary>,
    /// Set when the run stopped on a transient failure; the batch stays
    /// `processing`
    pub halted: Option<TransientHalt>,
}

/// Recipients left to send to, after filtering.
struct Plan {
    template: MessageTemplate,
    resolved: usize,
    skipped_opt_out: usize,
    skipped_hard_fail: usize,
    skipped_recorded: usize,
    remaining: Vec<RecipientCandidate>,
}

#[derive(Clone)]
pub struct SendOrchestrator {
    batches: Arc<dyn BatchStore>,
    recipients: RecipientService,
    suppressions: SuppressionService,
    engine: DeliveryEngine,
    test_phone: Option<String>,
}

impl SendOrchestrator {
    pub fn new(
        batches: Arc<dyn BatchStore>,
        recipients: RecipientService,
        suppressions: SuppressionService,
        engine: DeliveryEngine,
        test_phone: Option<String>,
    ) -> Self {
        Self {
            batches,
            recipients,
            suppressions,
            engine,
            test_phone,
        }
    }

    /// Creates a fresh `processing` batch.
    pub async fn create_batch(
        &self,
        template: &str,
        target: Target,
        test_mode: bool,
        now: Timestamp,
    ) -> AppResult<DeliveryBatch> {
        let batch = self
            .batches
            .create(
                NewDeliveryBatch {
                    message_body: template.to_string(),
                    target,
                    test_mode,
                },
                now,
            )
            .await?;
        tracing::info!(batch_id = batch.id, %target, test_mode, "Delivery batch created");
        Ok(batch)
    }

    /// Creates a batch and runs it to completion.
    pub async fn execute(
        &self,
        template: &str,
        target: Target,
        test_mode: bool,
        now: Timestamp,
    ) -> AppResult<BatchReport> {
        let batch = self.create_batch(template, target, test_mode, now).await?;
        self.run(batch).await
    }

    /// Runs a `processing` batch, skipping every phone it already recorded.
    pub async fn run(&self, batch: DeliveryBatch) -> AppResult<BatchReport> {
        if batch.status != BatchStatus::Processing {
            return Err(AppError::invalid_state(format!(
                "batch {} is {} and cannot be run",
                batch.id, batch.status
            )));
        }

        let plan = match self.prepare(&batch).await {
            Ok(plan) => plan,
            Err(e) => return Err(self.abort(batch.id, e).await),
        };

        let fresh = batch.results.is_empty();
        if fresh && plan.remaining.is_empty() {
            let reason = AppError::validation("recipients", "No recipients found");
            return Err(self.abort(batch.id, reason).await);
        }

        let recorded = i32::try_from(batch.results.len()).unwrap_or(i32::MAX);
        let remaining = i32::try_from(plan.remaining.len()).unwrap_or(i32::MAX);
        self.batches
            .set_total(batch.id, recorded.saturating_add(remaining))
            .await?;

        tracing::info!(
            batch_id = batch.id,
            resolved = plan.resolved,
            skipped_opt_out = plan.skipped_opt_out,
            skipped_hard_fail = plan.skipped_hard_fail,
            skipped_recorded = plan.skipped_recorded,
            remaining = plan.remaining.len(),
            "Sending batch"
        );

        let messages: Vec<OutboundMessage> = plan
            .remaining
            .iter()
            .map(|candidate| OutboundMessage {
                phone: candidate.phone.clone(),
                name: candidate.name.clone(),
                body: plan.template.render(candidate.name.as_deref()),
            })
            .collect();

        let mut sent = 0;
        let mut halted = None;
        let mut events = Box::pin(self.engine.send_batch(messages));
        while let Some(event) = events.next().await {
            match event {
                BatchEvent::Delivered { index, result } => {
                    let counts = self.batches.append_result(batch.id, &result).await?;
                    sent += 1;
                    tracing::debug!(
                        batch_id = batch.id,
                        index,
                        phone = %result.phone,
                        success = result.success,
                        attempted = counts.success_count + counts.failure_count,
                        total = counts.total,
                        "Recorded delivery result"
                    );
                }
                BatchEvent::Halted(halt) => {
                    halted = Some(halt);
                }
            }
        }

        // Failures recorded before a transient halt are suppressed too; the
        // replay is idempotent, so a later resume may process them again.
        let stored = self.batches.get(batch.id).await?;
        let mut report = BatchReport {
            batch_id: batch.id,
            status: BatchStatus::Processing,
            total: stored.total_recipients,
            success_count: stored.success_count,
            failure_count: stored.failure_count,
            resolved: plan.resolved,
            skipped_opt_out: plan.skipped_opt_out,
            skipped_hard_fail: plan.skipped_hard_fail,
            skipped_recorded: plan.skipped_recorded,
            sent,
            failures: self.record_failures(&stored).await,
            halted,
        };

        if let Some(halt) = &report.halted {
            tracing::warn!(
                batch_id = batch.id,
                index = halt.index,
                error = %halt.error,
                "Batch left processing after transient failure"
            );
            self.batches.release_run(batch.id).await?;
            return Ok(report);
        }

        let status = if stored.failure_count == 0 {
            BatchStatus::Sent
        } else {
            BatchStatus::Failed
        };
        if !self
            .batches
            .finalize(batch.id, status, None, Timestamp::now())
            .await?
        {
            tracing::warn!(batch_id = batch.id, "Batch was finalized concurrently");
        }

        report.status = status;

        tracing::info!(
            batch_id = batch.id,
            %status,
            total = report.total,
            success_count = report.success_count,
            failure_count = report.failure_count,
            "Batch finished"
        );
        Ok(report)
    }

    /// Feeds the batch's failed results to the suppression directory. Errors
    /// are logged and leave the batch outcome alone.
    async fn record_failures(&self, batch: &DeliveryBatch) -> Option<FailureSummary> {
        let failed = batch.failed_results();
        if failed.is_empty() {
            return None;
        }
        match self
            .suppressions
            .process_failures(&failed, Some(batch.id), Timestamp::now())
            .await
        {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::error!(batch_id = batch.id, error = %e, "Failure post-processing failed");
                None
            }
        }
    }

    /// Fails a batch that will never be sent.
    pub async fn discard(&self, batch_id: i64, reason: &str) -> AppResult<()> {
        if self
            .batches
            .finalize(batch_id, BatchStatus::Failed, Some(reason), Timestamp::now())
            .await?
        {
            tracing::warn!(batch_id, %reason, "Delivery batch discarded");
        }
        Ok(())
    }

    /// Template check, gateway check and recipient resolution, followed by
    /// the suppression filter and the resume exclusion.
    async fn prepare(&self, batch: &DeliveryBatch) -> AppResult<Plan> {
        let template = MessageTemplate::parse(&batch.message_body)?;
        self.engine.gateway().validate_config().await?;

        let mut candidates = self.recipients.resolve(&batch.target).await?;
        if batch.test_mode {
            let phone = self.test_phone.as_deref().ok_or_else(|| AppError::Configuration {
                key: "delivery.test_phone".to_string(),
                source: anyhow::anyhow!("test mode requires a configured test phone"),
            })?;
            candidates = vec![RecipientCandidate::new(phone, Some(TEST_RECIPIENT_NAME))];
        }
        let resolved = candidates.len();

        let filtered = self.suppressions.filter(candidates).await?;

        let recorded = batch.recorded_phones();
        let (skipped, remaining): (Vec<_>, Vec<_>) = filtered
            .kept
            .into_iter()
            .partition(|candidate| recorded.contains(candidate.phone.as_str()));

        Ok(Plan {
            template,
            resolved,
            skipped_opt_out: filtered.skipped_opt_out,
            skipped_hard_fail: filtered.skipped_hard_fail,
            skipped_recorded: skipped.len(),
            remaining,
        })
    }

    /// Marks the batch failed and converts `error` into `BatchAborted`.
    async fn abort(&self, batch_id: i64, error: AppError) -> AppError {
        let reason = error.reason();
        tracing::warn!(batch_id, %reason, "Batch aborted before sending");

        if let Err(e) = self
            .batches
            .finalize(batch_id, BatchStatus::Failed, Some(&reason), Timestamp::now())
            .await
        {
            tracing::error!(batch_id, error = %e, "Failed to mark aborted batch as failed");
        }
        AppError::BatchAborted { batch_id, reason }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::{SuppressionCategory, SuppressionUpsert};
    use crate::repositories::{MemoryStore, SuppressionStore};
    use crate::services::gateway::{GatewayResponse, SmsGateway};
    use crate::services::testing::{ScriptedGateway, memory_repositories, ts};

    struct Harness {
        store: Arc<MemoryStore>,
        gateway: Arc<ScriptedGateway>,
        orchestrator: SendOrchestrator,
    }

    fn harness_with(gateway: ScriptedGateway, raise_on_transient: bool) -> Harness {
        let (store, repos) = memory_repositories();
        let gateway = Arc::new(gateway);
        let sms: Arc<dyn SmsGateway> = gateway.clone();
        let orchestrator = SendOrchestrator::new(
            repos.batches.clone(),
            RecipientService::new(repos.directory.clone()),
            SuppressionService::new(repos.suppressions.clone(), repos.directory.clone()),
            DeliveryEngine::new(sms, Duration::ZERO, raise_on_transient),
            Some("+15559990000".to_string()),
        );
        Harness {
            store,
            gateway,
            orchestrator,
        }
    }

    fn harness() -> Harness {
        let harness = harness_with(ScriptedGateway::new(), false);
        harness.store.add_member("+15551110001", Some("Ann"));
        harness.store.add_member("+15551110002", Some("Bob"));
        harness
    }

    #[tokio::test]
    async fn test_all_recipients_succeed() {
        let h = harness();

        let report = h
            .orchestrator
            .execute("Hi {first_name}!", Target::Community, false, ts(0))
            .await
            .unwrap();

        assert_eq!(report.status, BatchStatus::Sent);
        assert_eq!((report.total, report.success_count, report.failure_count), (2, 2, 0));
        assert_eq!(h.gateway.sent_bodies(), vec!["Hi Ann!", "Hi Bob!"]);

        let batch = BatchStore::get(h.store.as_ref(), report.batch_id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Sent);
        assert_eq!(batch.message_body, "Hi {first_name}!");
        assert!(batch.completed_at.is_some());
        assert!(batch.results.iter().all(|r| r.gateway_id.is_some()));
    }

    #[tokio::test]
    async fn test_suppressed_recipient_is_skipped() {
        let h = harness();
        h.store
            .upsert(
                &SuppressionUpsert {
                    phone: "+15551110002".to_string(),
                    category: SuppressionCategory::OptOut,
                    name: None,
                    reason: Some("STOP".to_string()),
                    source: "inbound".to_string(),
                    batch_id: None,
                },
                ts(0),
            )
            .await
            .unwrap();

        let report = h
            .orchestrator
            .execute("Hi {first_name}!", Target::Community, false, ts(0))
            .await
            .unwrap();

        assert_eq!(report.resolved, 2);
        assert_eq!(report.skipped_opt_out, 1);
        assert_eq!(report.total, 1);
        assert_eq!(h.gateway.sent_phones(), vec!["+15551110001"]);
    }

    #[tokio::test]
    async fn test_mixed_failures_are_classified() {
        let h = harness();
        h.gateway.script(
            "+15551110001",
            GatewayResponse::rejected(400, None, "invalid number"),
        );
        h.gateway.script(
            "+15551110002",
            GatewayResponse::rejected(400, None, "rate limit exceeded"),
        );

        let report = h
            .orchestrator
            .execute("Hi {first_name}!", Target::Community, false, ts(0))
            .await
            .unwrap();

        assert_eq!(report.status, BatchStatus::Failed);
        assert_eq!(report.failure_count, 2);
        let failures = report.failures.unwrap();
        assert_eq!((failures.hard_fail, failures.soft_fail), (1, 1));

        let store = h.store.as_ref();
        for category in SuppressionCategory::ALL {
            let invalid = SuppressionStore::get(store, category, "+15551110001").await.unwrap();
            let limited = SuppressionStore::get(store, category, "+15551110002").await.unwrap();
            assert_eq!(invalid.is_some(), category == SuppressionCategory::HardFail);
            assert!(limited.is_none());
        }
        assert_eq!(h.store.member_phones(), vec!["+15551110002"]);
    }

    #[tokio::test]
    async fn test_resume_sends_only_unrecorded_phones() {
        let h = harness();
        h.store.add_member("+15551110003", Some("Cy"));
        h.store.add_member("+15551110004", Some("Di"));

        let batch = h
            .orchestrator
            .create_batch("Hi {first_name}!", Target::Community, false, ts(0))
            .await
            .unwrap();
        h.store.set_total(batch.id, 4).await.unwrap();
        for (phone, name) in [("+15551110001", "Ann"), ("+15551110002", "Bob")] {
            let result = crate::models::DeliveryResult::delivered(
                phone,
                Some(name.to_string()),
                format!("Hi {}!", name),
                Some("SM-old".to_string()),
            );
            h.store.append_result(batch.id, &result).await.unwrap();
        }

        let batch = BatchStore::get(h.store.as_ref(), batch.id).await.unwrap();
        let report = h.orchestrator.run(batch).await.unwrap();

        assert_eq!(h.gateway.sent_phones(), vec!["+15551110003", "+15551110004"]);
        assert_eq!(report.skipped_recorded, 2);
        assert_eq!(report.sent, 2);
        assert_eq!((report.total, report.success_count), (4, 4));
        assert_eq!(report.status, BatchStatus::Sent);
    }

    #[tokio::test]
    async fn test_duplicate_pool_phone_is_skipped_on_resume() {
        let h = harness();
        h.store.add_member("+15551110001", Some("Ann again"));

        let batch = h
            .orchestrator
            .create_batch("Hi", Target::Community, false, ts(0))
            .await
            .unwrap();
        h.store.set_total(batch.id, 3).await.unwrap();
        let first = crate::models::DeliveryResult::delivered("+15551110001", None, "Hi", None);
        h.store.append_result(batch.id, &first).await.unwrap();

        let batch = BatchStore::get(h.store.as_ref(), batch.id).await.unwrap();
        let report = h.orchestrator.run(batch).await.unwrap();

        assert_eq!(h.gateway.sent_phones(), vec!["+15551110002"]);
        assert_eq!(report.skipped_recorded, 2);
        assert_eq!(report.total, 2);
    }

    #[tokio::test]
    async fn test_unknown_placeholder_aborts_before_sending() {
        let h = harness();

        let err = h
            .orchestrator
            .execute("Hi {nickname}", Target::Community, false, ts(0))
            .await
            .unwrap_err();

        let AppError::BatchAborted { batch_id, reason } = err else {
            panic!("expected BatchAborted");
        };
        assert!(reason.contains("{nickname}"));
        assert!(h.gateway.sent_phones().is_empty());

        let batch = BatchStore::get(h.store.as_ref(), batch_id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.error_message.as_deref(), Some(reason.as_str()));
    }

    #[tokio::test]
    async fn test_missing_gateway_credentials_abort() {
        let h = harness_with(ScriptedGateway::misconfigured("Missing gateway credentials"), false);
        h.store.add_member("+15551110001", None);

        let err = h
            .orchestrator
            .execute("Hi", Target::Community, false, ts(0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BatchAborted { .. }));
        assert!(h.gateway.sent_phones().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_event_and_empty_pool_abort() {
        let h = harness_with(ScriptedGateway::new(), false);

        let unknown = h
            .orchestrator
            .execute("Hi", Target::Event(77), false, ts(0))
            .await
            .unwrap_err();
        assert!(unknown.reason().contains("Event"));

        let empty = h
            .orchestrator
            .execute("Hi", Target::Community, false, ts(0))
            .await
            .unwrap_err();
        match empty {
            AppError::BatchAborted { reason, .. } => assert_eq!(reason, "No recipients found"),
            other => panic!("expected BatchAborted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_test_mode_sends_single_admin_message() {
        let h = harness();

        let report = h
            .orchestrator
            .execute("Hi {full_name}", Target::Community, true, ts(0))
            .await
            .unwrap();

        assert_eq!(report.total, 1);
        assert_eq!(h.gateway.sent_phones(), vec!["+15559990000"]);
        assert_eq!(h.gateway.sent_bodies(), vec!["Hi Admin Test"]);
    }

    #[tokio::test]
    async fn test_transient_halt_leaves_batch_resumable() {
        let h = harness_with(ScriptedGateway::new(), true);
        h.store.add_member("+15551110001", Some("Ann"));
        h.store.add_member("+15551110002", Some("Bob"));
        h.gateway.script(
            "+15551110002",
            GatewayResponse::rejected(503, None, "Service Unavailable"),
        );

        let report = h
            .orchestrator
            .execute("Hi {first_name}!", Target::Community, false, ts(0))
            .await
            .unwrap();

        let halt = report.halted.clone().unwrap();
        assert_eq!(halt.index, 1);
        assert_eq!(report.status, BatchStatus::Processing);
        assert_eq!((report.total, report.success_count), (2, 1));

        let batch = BatchStore::get(h.store.as_ref(), report.batch_id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Processing);
        assert_eq!(batch.results.len(), 1);
    }

    #[tokio::test]
    async fn test_opt_out_before_a_halt_is_suppressed() {
        let h = harness_with(ScriptedGateway::new(), true);
        h.store.add_member("+15551110001", Some("Ann"));
        h.store.add_member("+15551110002", Some("Bob"));
        h.gateway.script(
            "+15551110001",
            GatewayResponse::rejected(400, None, "Attempt to send to unsubscribed recipient"),
        );
        h.gateway.script(
            "+15551110002",
            GatewayResponse::rejected(503, None, "Service Unavailable"),
        );

        let report = h
            .orchestrator
            .execute("Hi", Target::Community, false, ts(0))
            .await
            .unwrap();

        assert!(report.halted.is_some());
        assert_eq!(report.failures.map(|f| f.opt_out), Some(1));
        let entry =
            SuppressionStore::get(h.store.as_ref(), SuppressionCategory::OptOut, "+15551110001")
                .await
                .unwrap();
        assert!(entry.is_some());
        assert_eq!(h.store.member_phones(), vec!["+15551110002"]);
    }

    #[tokio::test]
    async fn test_discarded_batch_is_failed() {
        let h = harness();
        let batch = h
            .orchestrator
            .create_batch("Hi", Target::Community, false, ts(0))
            .await
            .unwrap();

        h.orchestrator.discard(batch.id, "job reclaimed").await.unwrap();

        let stored = BatchStore::get(h.store.as_ref(), batch.id).await.unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("job reclaimed"));
        let err = h.orchestrator.run(stored).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_terminal_batch_cannot_run() {
        let h = harness();
        let report = h
            .orchestrator
            .execute("Hi", Target::Community, false, ts(0))
            .await
            .unwrap();

        let batch = BatchStore::get(h.store.as_ref(), report.batch_id).await.unwrap();
        let err = h.orchestrator.run(batch).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState { .. }));
    }
}
