use std::fmt;

use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::schema::suppressions;

/// The two disjoint suppression stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::SuppressionCategory")]
#[serde(rename_all = "snake_case")]
pub enum SuppressionCategory {
    /// The recipient asked to stop receiving messages
    OptOut,
    /// The number is invalid or unreachable
    HardFail,
}

impl SuppressionCategory {
    pub const ALL: [SuppressionCategory; 2] =
        [SuppressionCategory::OptOut, SuppressionCategory::HardFail];

    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionCategory::OptOut => "opt_out",
            SuppressionCategory::HardFail => "hard_fail",
        }
    }
}

impl fmt::Display for SuppressionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phone that must be excluded from all future targeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuppressionEntry {
    pub id: i64,
    pub phone: String,
    pub category: SuppressionCategory,
    pub name: Option<String>,
    pub reason: Option<String>,
    pub source: String,
    pub batch_id: Option<i64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Write request for the suppression directory, keyed by `(category, phone)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressionUpsert {
    pub phone: String,
    pub category: SuppressionCategory,
    pub name: Option<String>,
    pub reason: Option<String>,
    pub source: String,
    pub batch_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = suppressions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SuppressionEntryRow {
    pub id: i64,
    pub phone: String,
    pub category: SuppressionCategory,
    pub name: Option<String>,
    pub reason: Option<String>,
    pub source: String,
    pub batch_id: Option<i64>,
    pub created_at: jiff_diesel::Timestamp,
    pub updated_at: jiff_diesel::Timestamp,
}

impl From<SuppressionEntryRow> for SuppressionEntry {
    fn from(row: SuppressionEntryRow) -> Self {
        Self {
            id: row.id,
            phone: row.phone,
            category: row.category,
            name: row.name,
            reason: row.reason,
            source: row.source,
            batch_id: row.batch_id,
            created_at: row.created_at.to_jiff(),
            updated_at: row.updated_at.to_jiff(),
        }
    }
}
