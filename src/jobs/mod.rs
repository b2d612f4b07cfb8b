//! Scheduled sends: claiming, expiry, per-tick execution and the
//! development poller.

pub mod claimer;
pub mod executor;
pub mod models;
pub mod scheduler;
pub mod types;

pub use claimer::{NextClaim, ScheduledJobClaimer};
pub use executor::JobExecutor;
pub use models::{NewScheduledJob, ScheduledJob};
pub use scheduler::DevPoller;
pub use types::{ClaimFailure, JobOutcome, JobStatus, TickReport};
