use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a scheduled send.
///
/// `pending -> processing` happens only through an atomic claim; every other
/// state after `processing` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::JobStatus")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Expired,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Sent | JobStatus::Failed | JobStatus::Expired | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Sent => write!(f, "sent"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Expired => write!(f, "expired"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What happened to one claimed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Sent { batch_id: i64 },
    Failed { batch_id: Option<i64>, reason: String },
    Expired,
    /// The job left `processing` while it ran (stale-reclaimed by another worker)
    Superseded { batch_id: Option<i64> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimFailure {
    pub job_id: i64,
    pub error: String,
}

/// Summary of one `run_scheduler_tick` invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub tick_id: Uuid,
    pub reclaimed: Vec<i64>,
    pub claimed: Vec<i64>,
    pub outcomes: Vec<(i64, JobOutcome)>,
    pub claim_failures: Vec<ClaimFailure>,
}

impl TickReport {
    pub fn new() -> Self {
        Self {
            tick_id: Uuid::new_v4(),
            ..Self::default()
        }
    }

    pub fn count(&self, predicate: impl Fn(&JobOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| predicate(o)).count()
    }

    pub fn outcome_of(&self, job_id: i64) -> Option<&JobOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == job_id)
            .map(|(_, o)| o)
    }
}
