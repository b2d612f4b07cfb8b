//! In-process implementation of every storage seam.
//!
//! Each mutation takes the relevant lock for its whole check-and-set, which
//! gives the same single-winner guarantees as the conditional updates issued
//! by the Postgres repositories.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use jiff::Timestamp;

use crate::error::{AppError, AppResult};
use crate::jobs::models::{NewScheduledJob, ScheduledJob};
use crate::jobs::types::JobStatus;
use crate::models::{
    BatchCounts, BatchStatus, BatchStatusView, DeliveryBatch, DeliveryResult, NewDeliveryBatch,
    RecipientCandidate, SuppressionCategory, SuppressionEntry, SuppressionUpsert, UpsertOutcome,
};
use crate::repositories::traits::{
    BatchStore, DirectoryRemoval, JobStore, RecipientDirectory, SuppressionStore,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    jobs: Mutex<BTreeMap<i64, ScheduledJob>>,
    batches: Mutex<BTreeMap<i64, DeliveryBatch>>,
    suppressions: DashMap<(SuppressionCategory, String), SuppressionEntry>,
    members: Mutex<Vec<RecipientCandidate>>,
    events: Mutex<BTreeMap<i64, Vec<RecipientCandidate>>>,
    /// Run lease start per batch id
    run_leases: DashMap<i64, Timestamp>,
    /// Remaining forced contention failures per job id
    contention: DashMap<i64, u32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn add_member(&self, phone: &str, name: Option<&str>) {
        lock(&self.members).push(RecipientCandidate::new(phone, name));
    }

    /// Creates an event with the given registrants, returning its id.
    pub fn add_event(&self, registrants: &[(&str, Option<&str>)]) -> i64 {
        let id = self.next_id();
        let list = registrants
            .iter()
            .map(|(phone, name)| RecipientCandidate::new(*phone, *name))
            .collect();
        lock(&self.events).insert(id, list);
        id
    }

    /// Makes the next `times` claim attempts on `job_id` fail with contention.
    pub fn inject_contention(&self, job_id: i64, times: u32) {
        self.contention.insert(job_id, times);
    }

    pub fn member_phones(&self) -> Vec<String> {
        lock(&self.members).iter().map(|m| m.phone.clone()).collect()
    }

    fn take_contention(&self, job_id: i64) -> bool {
        match self.contention.get_mut(&job_id) {
            Some(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn batch_not_found(id: i64) -> AppError {
        AppError::not_found("DeliveryBatch", "id", id)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, job: NewScheduledJob, now: Timestamp) -> AppResult<ScheduledJob> {
        let created = ScheduledJob {
            id: self.next_id(),
            created_at: now,
            scheduled_at: job.scheduled_at,
            message_template: job.message_template,
            target: job.target,
            status: JobStatus::Pending,
            test_mode: job.test_mode,
            processing_started_at: None,
            completed_at: None,
            error_message: None,
            batch_id: None,
        };
        lock(&self.jobs).insert(created.id, created.clone());
        Ok(created)
    }

    async fn get(&self, id: i64) -> AppResult<ScheduledJob> {
        lock(&self.jobs)
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found("ScheduledJob", "id", id))
    }

    async fn reclaim_stale(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
        reason: &str,
    ) -> AppResult<Vec<i64>> {
        let mut jobs = lock(&self.jobs);
        let mut reclaimed = Vec::new();
        for job in jobs.values_mut() {
            let stale = job.status == JobStatus::Processing
                && job.processing_started_at.is_some_and(|started| started < cutoff);
            if stale {
                job.status = JobStatus::Failed;
                job.error_message = Some(reason.to_string());
                job.completed_at = Some(now);
                reclaimed.push(job.id);
            }
        }
        Ok(reclaimed)
    }

    async fn find_due(&self, now: Timestamp) -> AppResult<Vec<ScheduledJob>> {
        let mut due: Vec<ScheduledJob> = lock(&self.jobs)
            .values()
            .filter(|job| job.status == JobStatus::Pending && job.scheduled_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|job| (job.scheduled_at, job.id));
        Ok(due)
    }

    async fn try_claim(&self, id: i64, now: Timestamp) -> AppResult<bool> {
        if self.take_contention(id) {
            return Err(AppError::Contention {
                operation: "claim scheduled job".to_string(),
            });
        }

        let mut jobs = lock(&self.jobs);
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Processing;
                job.processing_started_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn attach_batch(&self, id: i64, batch_id: i64) -> AppResult<bool> {
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("ScheduledJob", "id", id))?;
        if job.status != JobStatus::Processing {
            return Ok(false);
        }
        job.batch_id = Some(batch_id);
        Ok(true)
    }

    async fn finish(
        &self,
        id: i64,
        status: JobStatus,
        error: Option<&str>,
        now: Timestamp,
    ) -> AppResult<bool> {
        let mut jobs = lock(&self.jobs);
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = status;
                job.error_message = error.map(str::to_string);
                job.completed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel(&self, id: i64, now: Timestamp) -> AppResult<bool> {
        let mut jobs = lock(&self.jobs);
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn create(&self, batch: NewDeliveryBatch, now: Timestamp) -> AppResult<DeliveryBatch> {
        let created = DeliveryBatch {
            id: self.next_id(),
            created_at: now,
            message_body: batch.message_body,
            target: batch.target,
            test_mode: batch.test_mode,
            status: BatchStatus::Processing,
            total_recipients: 0,
            success_count: 0,
            failure_count: 0,
            error_message: None,
            completed_at: None,
            results: Vec::new(),
        };
        lock(&self.batches).insert(created.id, created.clone());
        self.run_leases.insert(created.id, now);
        Ok(created)
    }

    async fn get(&self, id: i64) -> AppResult<DeliveryBatch> {
        lock(&self.batches)
            .get(&id)
            .cloned()
            .ok_or_else(|| Self::batch_not_found(id))
    }

    async fn status(&self, id: i64) -> AppResult<BatchStatusView> {
        lock(&self.batches)
            .get(&id)
            .map(DeliveryBatch::status_view)
            .ok_or_else(|| Self::batch_not_found(id))
    }

    async fn set_total(&self, id: i64, total: i32) -> AppResult<()> {
        let mut batches = lock(&self.batches);
        let batch = batches.get_mut(&id).ok_or_else(|| Self::batch_not_found(id))?;
        if batch.status != BatchStatus::Processing || batch.attempted() > total {
            return Err(AppError::invalid_state(format!(
                "batch {} is not processing or already has more than {} results",
                id, total
            )));
        }
        batch.total_recipients = total;
        Ok(())
    }

    async fn append_result(&self, id: i64, result: &DeliveryResult) -> AppResult<BatchCounts> {
        let mut batches = lock(&self.batches);
        let batch = batches.get_mut(&id).ok_or_else(|| Self::batch_not_found(id))?;
        if batch.status != BatchStatus::Processing || batch.attempted() >= batch.total_recipients {
            return Err(AppError::invalid_state(format!(
                "batch {} does not accept more results",
                id
            )));
        }

        if result.success {
            batch.success_count += 1;
        } else {
            batch.failure_count += 1;
        }
        batch.results.push(result.clone());

        Ok(BatchCounts {
            total: batch.total_recipients,
            success_count: batch.success_count,
            failure_count: batch.failure_count,
        })
    }

    async fn finalize(
        &self,
        id: i64,
        status: BatchStatus,
        error: Option<&str>,
        now: Timestamp,
    ) -> AppResult<bool> {
        let mut batches = lock(&self.batches);
        match batches.get_mut(&id) {
            Some(batch) if batch.status == BatchStatus::Processing => {
                batch.status = status;
                batch.error_message = error.map(str::to_string);
                batch.completed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_run(&self, id: i64, now: Timestamp, cutoff: Timestamp) -> AppResult<bool> {
        let batches = lock(&self.batches);
        if !batches
            .get(&id)
            .is_some_and(|batch| batch.status == BatchStatus::Processing)
        {
            return Ok(false);
        }
        match self.run_leases.entry(id) {
            Entry::Occupied(mut held) if *held.get() < cutoff => {
                held.insert(now);
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(free) => {
                free.insert(now);
                Ok(true)
            }
        }
    }

    async fn release_run(&self, id: i64) -> AppResult<()> {
        let _batches = lock(&self.batches);
        self.run_leases.remove(&id);
        Ok(())
    }

    async fn list_finished_ids(&self, after_id: i64, limit: i64) -> AppResult<Vec<i64>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(lock(&self.batches)
            .range(after_id + 1..)
            .filter(|(_, batch)| batch.status.is_terminal())
            .map(|(id, _)| *id)
            .take(limit)
            .collect())
    }
}

#[async_trait]
impl SuppressionStore for MemoryStore {
    async fn find_suppressed(
        &self,
        category: SuppressionCategory,
        phones: &[String],
    ) -> AppResult<HashSet<String>> {
        Ok(phones
            .iter()
            .filter(|phone| self.suppressions.contains_key(&(category, phone.to_string())))
            .cloned()
            .collect())
    }

    async fn upsert(&self, entry: &SuppressionUpsert, now: Timestamp) -> AppResult<UpsertOutcome> {
        match self.suppressions.entry((entry.category, entry.phone.clone())) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                if entry.reason.is_some() {
                    existing.reason = entry.reason.clone();
                }
                if entry.name.is_some() {
                    existing.name = entry.name.clone();
                }
                if entry.batch_id.is_some() {
                    existing.batch_id = entry.batch_id;
                }
                existing.source = entry.source.clone();
                existing.updated_at = now;
                Ok(UpsertOutcome::Updated)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(SuppressionEntry {
                    id: self.next_id(),
                    phone: entry.phone.clone(),
                    category: entry.category,
                    name: entry.name.clone(),
                    reason: entry.reason.clone(),
                    source: entry.source.clone(),
                    batch_id: entry.batch_id,
                    created_at: now,
                    updated_at: now,
                });
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn get(
        &self,
        category: SuppressionCategory,
        phone: &str,
    ) -> AppResult<Option<SuppressionEntry>> {
        Ok(self
            .suppressions
            .get(&(category, phone.to_string()))
            .map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl RecipientDirectory for MemoryStore {
    async fn list_pool_members(&self) -> AppResult<Vec<RecipientCandidate>> {
        Ok(lock(&self.members).clone())
    }

    async fn list_event_registrants(&self, event_id: i64) -> AppResult<Vec<RecipientCandidate>> {
        lock(&self.events)
            .get(&event_id)
            .cloned()
            .ok_or_else(|| AppError::not_found("Event", "id", event_id))
    }

    async fn remove_phones(&self, phones: &[String]) -> AppResult<DirectoryRemoval> {
        let targets: HashSet<&str> = phones.iter().map(String::as_str).collect();

        let mut members = lock(&self.members);
        let before = members.len();
        members.retain(|m| !targets.contains(m.phone.as_str()));
        let pool_members = before - members.len();

        let mut event_registrants = 0;
        for registrants in lock(&self.events).values_mut() {
            let before = registrants.len();
            registrants.retain(|r| !targets.contains(r.phone.as_str()));
            event_registrants += before - registrants.len();
        }

        Ok(DirectoryRemoval {
            pool_members,
            event_registrants,
        })
    }
}
