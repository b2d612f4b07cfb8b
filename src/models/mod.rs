//! Domain models shared by the stores, the delivery pipeline and the CLI.
//!
//! Each module pairs the domain type with the diesel row types used by the
//! Postgres repositories.

mod batch;
mod recipient;
mod request;
mod suppression;
mod target;

pub use batch::{
    BatchCounts, BatchStatus, BatchStatusView, DeliveryBatch, DeliveryBatchRow, DeliveryResult,
    DeliveryResultRow, NewDeliveryBatch, NewDeliveryBatchRow, NewDeliveryResultRow,
};
pub use recipient::RecipientCandidate;
pub use request::{ScheduleRequest, SendRequest};
pub use suppression::{
    SuppressionCategory, SuppressionEntry, SuppressionEntryRow, SuppressionUpsert, UpsertOutcome,
};
pub use target::{Target, TargetKind};
