//! Suppression filtering and failure post-processing.

use std::collections::BTreeSet;
use std::sync::Arc;

use jiff::Timestamp;
use serde::Serialize;

use crate::error::AppResult;
use crate::models::{
    DeliveryResult, RecipientCandidate, SuppressionCategory, SuppressionUpsert, UpsertOutcome,
};
use crate::repositories::{BatchStore, RecipientDirectory, SuppressionStore};
use crate::services::classifier::{FailureCategory, classify};

/// Source recorded on entries created from delivery failures.
pub const FAILURE_SOURCE: &str = "message_failure";

/// Candidates split by suppression status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    pub kept: Vec<RecipientCandidate>,
    pub skipped_opt_out: usize,
    pub skipped_hard_fail: usize,
}

/// Counters reported by one `process_failures` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    pub failed: usize,
    pub opt_out: usize,
    pub hard_fail: usize,
    pub soft_fail: usize,
    pub inserted: usize,
    pub updated: usize,
    pub pool_removals: usize,
    pub event_removals: usize,
    pub skipped_no_phone: usize,
}

impl FailureSummary {
    pub fn absorb(&mut self, other: FailureSummary) {
        self.failed += other.failed;
        self.opt_out += other.opt_out;
        self.hard_fail += other.hard_fail;
        self.soft_fail += other.soft_fail;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.pool_removals += other.pool_removals;
        self.event_removals += other.event_removals;
        self.skipped_no_phone += other.skipped_no_phone;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub batches: usize,
    pub summary: FailureSummary,
}

#[derive(Clone)]
pub struct SuppressionService {
    store: Arc<dyn SuppressionStore>,
    directory: Arc<dyn RecipientDirectory>,
}

impl SuppressionService {
    pub fn new(store: Arc<dyn SuppressionStore>, directory: Arc<dyn RecipientDirectory>) -> Self {
        Self { store, directory }
    }

    pub async fn is_suppressed(&self, phone: &str, category: SuppressionCategory) -> AppResult<bool> {
        Ok(self.store.get(category, phone).await?.is_some())
    }

    /// Drops candidates present in either store, preserving order. A phone in
    /// both stores counts as an opt-out skip.
    pub async fn filter(&self, candidates: Vec<RecipientCandidate>) -> AppResult<FilterOutcome> {
        let phones: Vec<String> = candidates.iter().map(|c| c.phone.clone()).collect();
        let opted_out = self
            .store
            .find_suppressed(SuppressionCategory::OptOut, &phones)
            .await?;
        let hard_failed = self
            .store
            .find_suppressed(SuppressionCategory::HardFail, &phones)
            .await?;

        let mut outcome = FilterOutcome::default();
        for candidate in candidates {
            if opted_out.contains(&candidate.phone) {
                outcome.skipped_opt_out += 1;
            } else if hard_failed.contains(&candidate.phone) {
                outcome.skipped_hard_fail += 1;
            } else {
                outcome.kept.push(candidate);
            }
        }
        Ok(outcome)
    }

    pub async fn upsert(&self, entry: &SuppressionUpsert, now: Timestamp) -> AppResult<UpsertOutcome> {
        self.store.upsert(entry, now).await
    }

    /// Classifies every failed result, records opt-out and hard-fail phones
    /// and removes them from the recipient directory. Replaying the same
    /// results inserts nothing and removes nothing.
    pub async fn process_failures(
        &self,
        results: &[DeliveryResult],
        batch_id: Option<i64>,
        now: Timestamp,
    ) -> AppResult<FailureSummary> {
        let mut summary = FailureSummary::default();
        let mut suppressed: BTreeSet<String> = BTreeSet::new();

        for result in results.iter().filter(|r| !r.success) {
            summary.failed += 1;

            let phone = result.phone.trim();
            if phone.is_empty() {
                summary.skipped_no_phone += 1;
                continue;
            }

            let error = result.error.as_deref().unwrap_or_default();
            let category = classify(error);
            match category {
                FailureCategory::OptOut => summary.opt_out += 1,
                FailureCategory::HardFail => summary.hard_fail += 1,
                FailureCategory::SoftFail => summary.soft_fail += 1,
            }

            let Some(store) = category.suppression() else {
                continue;
            };
            let entry = SuppressionUpsert {
                phone: phone.to_string(),
                category: store,
                name: result.name.clone(),
                reason: Some(error.to_string()).filter(|e| !e.is_empty()),
                source: FAILURE_SOURCE.to_string(),
                batch_id,
            };
            match self.store.upsert(&entry, now).await? {
                UpsertOutcome::Inserted => summary.inserted += 1,
                UpsertOutcome::Updated => summary.updated += 1,
            }
            suppressed.insert(entry.phone);
        }

        if !suppressed.is_empty() {
            let phones: Vec<String> = suppressed.into_iter().collect();
            let removed = self.directory.remove_phones(&phones).await?;
            summary.pool_removals = removed.pool_members;
            summary.event_removals = removed.event_registrants;
        }

        tracing::info!(
            batch_id,
            failed = summary.failed,
            opt_out = summary.opt_out,
            hard_fail = summary.hard_fail,
            soft_fail = summary.soft_fail,
            inserted = summary.inserted,
            updated = summary.updated,
            pool_removals = summary.pool_removals,
            event_removals = summary.event_removals,
            skipped_no_phone = summary.skipped_no_phone,
            "Processed delivery failures"
        );
        Ok(summary)
    }

    /// Replays `process_failures` over every finished batch, in id order.
    pub async fn backfill(
        &self,
        batches: &dyn BatchStore,
        batch_size: i64,
        now: Timestamp,
    ) -> AppResult<BackfillReport> {
        let mut report = BackfillReport::default();
        let mut after_id = 0;

        loop {
            let ids = batches.list_finished_ids(after_id, batch_size.max(1)).await?;
            let Some(last) = ids.last().copied() else {
                break;
            };

            for id in ids {
                let batch = batches.get(id).await?;
                let failed = batch.failed_results();
                if !failed.is_empty() {
                    let summary = self.process_failures(&failed, Some(id), now).await?;
                    report.summary.absorb(summary);
                }
                report.batches += 1;
            }
            after_id = last;
        }

        tracing::info!(
            batches = report.batches,
            inserted = report.summary.inserted,
            updated = report.summary.updated,
            "Suppression backfill finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BatchStatus, NewDeliveryBatch, Target};
    use crate::services::testing::{memory_repositories, ts};

    fn service() -> (Arc<crate::repositories::MemoryStore>, SuppressionService) {
        let (store, repos) = memory_repositories();
        (store, SuppressionService::new(repos.suppressions, repos.directory))
    }

    fn suppress(phone: &str, category: SuppressionCategory) -> SuppressionUpsert {
        SuppressionUpsert {
            phone: phone.to_string(),
            category,
            name: None,
            reason: None,
            source: "manual".to_string(),
            batch_id: None,
        }
    }

    #[tokio::test]
    async fn test_filter_counts_each_store() {
        let (_store, service) = service();
        service
            .upsert(&suppress("+15550000002", SuppressionCategory::OptOut), ts(0))
            .await
            .unwrap();
        service
            .upsert(&suppress("+15550000003", SuppressionCategory::HardFail), ts(0))
            .await
            .unwrap();

        let outcome = service
            .filter(vec![
                RecipientCandidate::new("+15550000001", Some("Ann")),
                RecipientCandidate::new("+15550000002", None),
                RecipientCandidate::new("+15550000003", None),
                RecipientCandidate::new("+15550000004", None),
            ])
            .await
            .unwrap();

        let kept: Vec<&str> = outcome.kept.iter().map(|c| c.phone.as_str()).collect();
        assert_eq!(kept, vec!["+15550000001", "+15550000004"]);
        assert_eq!(outcome.skipped_opt_out, 1);
        assert_eq!(outcome.skipped_hard_fail, 1);

        assert!(service
            .is_suppressed("+15550000002", SuppressionCategory::OptOut)
            .await
            .unwrap());
        assert!(!service
            .is_suppressed("+15550000002", SuppressionCategory::HardFail)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_process_failures_is_idempotent() {
        let (store, service) = service();
        store.add_member("+15550000001", Some("Ann"));
        store.add_member("+15550000002", Some("Bob"));
        store.add_member("+15550000003", Some("Cy"));
        store.add_event(&[("+15550000002", Some("Bob"))]);

        let results = vec![
            DeliveryResult::delivered("+15550000004", None, "Hi", Some("SM1".to_string())),
            DeliveryResult::failed("+15550000001", Some("Ann".to_string()), "Hi", "User has unsubscribed"),
            DeliveryResult::failed("+15550000002", Some("Bob".to_string()), "Hi", "invalid number"),
            DeliveryResult::failed("+15550000003", None, "Hi", "rate limit exceeded"),
            DeliveryResult::failed("", None, "Hi", "invalid number"),
        ];

        let first = service.process_failures(&results, Some(9), ts(0)).await.unwrap();
        assert_eq!(first.failed, 4);
        assert_eq!(first.opt_out, 1);
        assert_eq!(first.hard_fail, 1);
        assert_eq!(first.soft_fail, 1);
        assert_eq!(first.skipped_no_phone, 1);
        assert_eq!(first.inserted, 2);
        assert_eq!(first.updated, 0);
        assert_eq!(first.pool_removals, 2);
        assert_eq!(first.event_removals, 1);
        assert_eq!(store.member_phones(), vec!["+15550000003"]);

        let replay = service.process_failures(&results, Some(9), ts(60)).await.unwrap();
        assert_eq!(replay.inserted, 0);
        assert_eq!(replay.updated, 2);
        assert_eq!(replay.pool_removals + replay.event_removals, 0);

        let entry = SuppressionStore::get(store.as_ref(), SuppressionCategory::HardFail, "+15550000002")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.source, FAILURE_SOURCE);
        assert_eq!(entry.batch_id, Some(9));
        assert_eq!(entry.reason.as_deref(), Some("invalid number"));
        assert!(!service
            .is_suppressed("+15550000003", SuppressionCategory::HardFail)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_backfill_pages_through_finished_batches() {
        let (store, service) = service();
        let mut ids = Vec::new();
        for i in 0..3 {
            let batch = BatchStore::create(
                store.as_ref(),
                NewDeliveryBatch {
                    message_body: "Hi".to_string(),
                    target: Target::Community,
                    test_mode: false,
                },
                ts(0),
            )
            .await
            .unwrap();
            store.set_total(batch.id, 1).await.unwrap();
            let phone = format!("+1555000010{}", i);
            store
                .append_result(batch.id, &DeliveryResult::failed(phone, None, "Hi", "landline"))
                .await
                .unwrap();
            ids.push(batch.id);
        }
        store.finalize(ids[0], BatchStatus::Failed, None, ts(1)).await.unwrap();
        store.finalize(ids[1], BatchStatus::Failed, None, ts(1)).await.unwrap();

        let report = service.backfill(store.as_ref(), 1, ts(2)).await.unwrap();
        assert_eq!(report.batches, 2);
        assert_eq!(report.summary.hard_fail, 2);
        assert_eq!(report.summary.inserted, 2);

        let again = service.backfill(store.as_ref(), 500, ts(3)).await.unwrap();
        assert_eq!(again.summary.inserted, 0);
        assert_eq!(again.summary.updated, 2);
    }
}
