use diesel::prelude::*;
use jiff::Timestamp;
use serde::Serialize;

use crate::error::AppResult;
use crate::jobs::types::JobStatus;
use crate::models::{Target, TargetKind};
use crate::schema::scheduled_jobs;

// ============================================================================
// Domain types
// ============================================================================

/// A deferred bulk-send intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledJob {
    pub id: i64,
    pub created_at: Timestamp,
    pub scheduled_at: Timestamp,
    pub message_template: String,
    pub target: Target,
    pub status: JobStatus,
    pub test_mode: bool,
    pub processing_started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub error_message: Option<String>,
    /// Weak link to the batch this job produced
    pub batch_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewScheduledJob {
    pub scheduled_at: Timestamp,
    pub message_template: String,
    pub target: Target,
    pub test_mode: bool,
}

// ============================================================================
// Diesel rows
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = scheduled_jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ScheduledJobRow {
    pub id: i64,
    pub created_at: jiff_diesel::Timestamp,
    pub scheduled_at: jiff_diesel::Timestamp,
    pub message_template: String,
    pub target_kind: TargetKind,
    pub event_id: Option<i64>,
    pub status: JobStatus,
    pub test_mode: bool,
    pub processing_started_at: Option<jiff_diesel::Timestamp>,
    pub completed_at: Option<jiff_diesel::Timestamp>,
    pub error_message: Option<String>,
    pub batch_id: Option<i64>,
}

impl ScheduledJobRow {
    pub fn into_job(self) -> AppResult<ScheduledJob> {
        Ok(ScheduledJob {
            id: self.id,
            created_at: self.created_at.to_jiff(),
            scheduled_at: self.scheduled_at.to_jiff(),
            message_template: self.message_template,
            target: Target::from_parts(self.target_kind, self.event_id)?,
            status: self.status,
            test_mode: self.test_mode,
            processing_started_at: self.processing_started_at.map(|t| t.to_jiff()),
            completed_at: self.completed_at.map(|t| t.to_jiff()),
            error_message: self.error_message,
            batch_id: self.batch_id,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = scheduled_jobs)]
pub struct NewScheduledJobRow {
    pub created_at: jiff_diesel::Timestamp,
    pub scheduled_at: jiff_diesel::Timestamp,
    pub message_template: String,
    pub target_kind: TargetKind,
    pub event_id: Option<i64>,
    pub status: JobStatus,
    pub test_mode: bool,
}

impl NewScheduledJobRow {
    pub fn new(job: NewScheduledJob, now: Timestamp) -> Self {
        Self {
            created_at: now.into(),
            scheduled_at: job.scheduled_at.into(),
            target_kind: job.target.kind(),
            event_id: job.target.event_id(),
            message_template: job.message_template,
            status: JobStatus::Pending,
            test_mode: job.test_mode,
        }
    }
}
