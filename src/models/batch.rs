use std::collections::HashSet;
use std::fmt;

use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::models::target::{Target, TargetKind};
use crate::schema::{delivery_batches, delivery_results};

// ============================================================================
// Domain types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::BatchStatus")]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Processing,
    Sent,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::Processing)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Processing => write!(f, "processing"),
            BatchStatus::Sent => write!(f, "sent"),
            BatchStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of one recipient within a batch. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub phone: String,
    pub name: Option<String>,
    /// Body after personalization
    pub body: String,
    pub success: bool,
    pub error: Option<String>,
    pub gateway_id: Option<String>,
}

impl DeliveryResult {
    pub fn delivered(
        phone: impl Into<String>,
        name: Option<String>,
        body: impl Into<String>,
        gateway_id: Option<String>,
    ) -> Self {
        Self {
            phone: phone.into(),
            name,
            body: body.into(),
            success: true,
            error: None,
            gateway_id,
        }
    }

    pub fn failed(
        phone: impl Into<String>,
        name: Option<String>,
        body: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            phone: phone.into(),
            name,
            body: body.into(),
            success: false,
            error: Some(error.into()),
            gateway_id: None,
        }
    }
}

/// One bulk-send execution, immediate or from a scheduled job.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryBatch {
    pub id: i64,
    pub created_at: Timestamp,
    /// Template text every recipient body was rendered from
    pub message_body: String,
    pub target: Target,
    pub test_mode: bool,
    pub status: BatchStatus,
    pub total_recipients: i32,
    pub success_count: i32,
    pub failure_count: i32,
    pub error_message: Option<String>,
    pub completed_at: Option<Timestamp>,
    /// Ordered by send position
    pub results: Vec<DeliveryResult>,
}

impl DeliveryBatch {
    /// Phones that already have a result; used to skip them on resume.
    pub fn recorded_phones(&self) -> HashSet<&str> {
        self.results.iter().map(|r| r.phone.as_str()).collect()
    }

    pub fn failed_results(&self) -> Vec<DeliveryResult> {
        self.results.iter().filter(|r| !r.success).cloned().collect()
    }

    pub fn attempted(&self) -> i32 {
        self.success_count + self.failure_count
    }

    pub fn status_view(&self) -> BatchStatusView {
        BatchStatusView {
            id: self.id,
            status: self.status,
            total: self.total_recipients,
            success_count: self.success_count,
            failure_count: self.failure_count,
            error_message: self.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewDeliveryBatch {
    pub message_body: String,
    pub target: Target,
    pub test_mode: bool,
}

/// Running counters returned after every appended result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub total: i32,
    pub success_count: i32,
    pub failure_count: i32,
}

/// Polling surface for progress displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchStatusView {
    pub id: i64,
    pub status: BatchStatus,
    pub total: i32,
    pub success_count: i32,
    pub failure_count: i32,
    pub error_message: Option<String>,
}

// ============================================================================
// Diesel rows
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = delivery_batches)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeliveryBatchRow {
    pub id: i64,
    pub created_at: jiff_diesel::Timestamp,
    pub message_body: String,
    pub target_kind: TargetKind,
    pub event_id: Option<i64>,
    pub test_mode: bool,
    pub status: BatchStatus,
    pub total_recipients: i32,
    pub success_count: i32,
    pub failure_count: i32,
    pub error_message: Option<String>,
    pub completed_at: Option<jiff_diesel::Timestamp>,
}

impl DeliveryBatchRow {
    pub fn into_batch(self, results: Vec<DeliveryResult>) -> AppResult<DeliveryBatch> {
        Ok(DeliveryBatch {
            id: self.id,
            created_at: self.created_at.to_jiff(),
            message_body: self.message_body,
            target: Target::from_parts(self.target_kind, self.event_id)?,
            test_mode: self.test_mode,
            status: self.status,
            total_recipients: self.total_recipients,
            success_count: self.success_count,
            failure_count: self.failure_count,
            error_message: self.error_message,
            completed_at: self.completed_at.map(|t| t.to_jiff()),
            results,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = delivery_batches)]
pub struct NewDeliveryBatchRow {
    pub created_at: jiff_diesel::Timestamp,
    pub message_body: String,
    pub target_kind: TargetKind,
    pub event_id: Option<i64>,
    pub test_mode: bool,
    pub status: BatchStatus,
    /// The creator holds the run lease from the start.
    pub run_claimed_at: Option<jiff_diesel::Timestamp>,
}

impl NewDeliveryBatchRow {
    pub fn new(batch: NewDeliveryBatch, now: Timestamp) -> Self {
        Self {
            created_at: now.into(),
            target_kind: batch.target.kind(),
            event_id: batch.target.event_id(),
            message_body: batch.message_body,
            test_mode: batch.test_mode,
            status: BatchStatus::Processing,
            run_claimed_at: Some(now.into()),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = delivery_results)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeliveryResultRow {
    pub position: i32,
    pub phone: String,
    pub name: Option<String>,
    pub body: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub gateway_id: Option<String>,
}

impl From<DeliveryResultRow> for DeliveryResult {
    fn from(row: DeliveryResultRow) -> Self {
        Self {
            phone: row.phone,
            name: row.name,
            body: row.body,
            success: row.success,
            error: row.error_message,
            gateway_id: row.gateway_id,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = delivery_results)]
pub struct NewDeliveryResultRow<'a> {
    pub batch_id: i64,
    pub position: i32,
    pub phone: &'a str,
    pub name: Option<&'a str>,
    pub body: &'a str,
    pub success: bool,
    pub error_message: Option<&'a str>,
    pub gateway_id: Option<&'a str>,
}

impl<'a> NewDeliveryResultRow<'a> {
    pub fn new(batch_id: i64, position: i32, result: &'a DeliveryResult) -> Self {
        Self {
            batch_id,
            position,
            phone: &result.phone,
            name: result.name.as_deref(),
            body: &result.body,
            success: result.success,
            error_message: result.error.as_deref(),
            gateway_id: result.gateway_id.as_deref(),
        }
    }
}
