//! Storage seams consumed by the delivery pipeline.
//!
//! Every mutation of a job or batch row is a conditional update keyed on the
//! expected current status, so concurrent workers never overwrite each other.

use std::collections::HashSet;

use async_trait::async_trait;
use jiff::Timestamp;

use crate::error::AppResult;
use crate::jobs::models::{NewScheduledJob, ScheduledJob};
use crate::jobs::types::JobStatus;
use crate::models::{
    BatchCounts, BatchStatus, BatchStatusView, DeliveryBatch, DeliveryResult, NewDeliveryBatch,
    RecipientCandidate, SuppressionCategory, SuppressionEntry, SuppressionUpsert, UpsertOutcome,
};

/// Scheduled job storage with atomic conditional transitions.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewScheduledJob, now: Timestamp) -> AppResult<ScheduledJob>;

    async fn get(&self, id: i64) -> AppResult<ScheduledJob>;

    /// Moves every `processing` job whose claim started strictly before
    /// `cutoff` to `failed`, returning the affected ids.
    async fn reclaim_stale(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
        reason: &str,
    ) -> AppResult<Vec<i64>>;

    /// Pending jobs with `scheduled_at <= now`, oldest trigger first.
    async fn find_due(&self, now: Timestamp) -> AppResult<Vec<ScheduledJob>>;

    /// Compare-and-swap `pending -> processing`. `Ok(false)` means another
    /// worker won the race.
    async fn try_claim(&self, id: i64, now: Timestamp) -> AppResult<bool>;

    /// Records the job's batch while the job is still `processing`.
    /// `Ok(false)` means the job was reclaimed and must not be sent.
    async fn attach_batch(&self, id: i64, batch_id: i64) -> AppResult<bool>;

    /// Guarded `processing -> status`. `Ok(false)` when the job already left
    /// `processing`.
    async fn finish(
        &self,
        id: i64,
        status: JobStatus,
        error: Option<&str>,
        now: Timestamp,
    ) -> AppResult<bool>;

    /// Guarded `pending -> cancelled`.
    async fn cancel(&self, id: i64, now: Timestamp) -> AppResult<bool>;
}

/// Delivery batch storage with incremental, guarded progress updates.
#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn create(&self, batch: NewDeliveryBatch, now: Timestamp) -> AppResult<DeliveryBatch>;

    /// The batch with its results in send order.
    async fn get(&self, id: i64) -> AppResult<DeliveryBatch>;

    async fn status(&self, id: i64) -> AppResult<BatchStatusView>;

    /// Records the recipient total of a `processing` batch.
    async fn set_total(&self, id: i64, total: i32) -> AppResult<()>;

    /// Appends one result and bumps the matching counter in one atomic step.
    /// Fails with `InvalidState` when the batch is terminal or already full.
    async fn append_result(&self, id: i64, result: &DeliveryResult) -> AppResult<BatchCounts>;

    /// Guarded `processing -> status`.
    async fn finalize(
        &self,
        id: i64,
        status: BatchStatus,
        error: Option<&str>,
        now: Timestamp,
    ) -> AppResult<bool>;

    /// Takes the run lease of a `processing` batch when nobody holds it or
    /// its holder took it strictly before `cutoff`. Creating a batch takes
    /// the lease for the creator.
    async fn claim_run(&self, id: i64, now: Timestamp, cutoff: Timestamp) -> AppResult<bool>;

    /// Gives up the run lease so the batch can be resumed right away.
    async fn release_run(&self, id: i64) -> AppResult<()>;

    /// Ids of terminal batches greater than `after_id`, ascending.
    async fn list_finished_ids(&self, after_id: i64, limit: i64) -> AppResult<Vec<i64>>;
}

/// Suppression directory storage, unique per `(category, phone)`.
#[async_trait]
pub trait SuppressionStore: Send + Sync {
    /// The subset of `phones` present in the given store.
    async fn find_suppressed(
        &self,
        category: SuppressionCategory,
        phones: &[String],
    ) -> AppResult<HashSet<String>>;

    /// Atomic per-phone upsert; a repeat refreshes reason, source, batch and
    /// `updated_at`.
    async fn upsert(&self, entry: &SuppressionUpsert, now: Timestamp) -> AppResult<UpsertOutcome>;

    async fn get(
        &self,
        category: SuppressionCategory,
        phone: &str,
    ) -> AppResult<Option<SuppressionEntry>>;
}

/// Rows deleted from the recipient directory for suppressed phones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DirectoryRemoval {
    pub pool_members: usize,
    pub event_registrants: usize,
}

impl DirectoryRemoval {
    pub fn total(&self) -> usize {
        self.pool_members + self.event_registrants
    }
}

/// Read access to recipient pools, plus removal of suppressed phones.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn list_pool_members(&self) -> AppResult<Vec<RecipientCandidate>>;

    /// Fails with `NotFound` for an unknown event.
    async fn list_event_registrants(&self, event_id: i64) -> AppResult<Vec<RecipientCandidate>>;

    /// Deletes `phones` from every pool. Absent phones are a no-op.
    async fn remove_phones(&self, phones: &[String]) -> AppResult<DirectoryRemoval>;
}
