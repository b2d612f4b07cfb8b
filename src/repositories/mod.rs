//! Data access for scheduled jobs, delivery batches, suppressions and the
//! recipient directory.
//!
//! Consumers depend on the traits in [`traits`]; the Postgres repositories and
//! [`MemoryStore`] are interchangeable behind them.

mod batch_repo;
mod job_repo;
mod memory;
mod recipient_repo;
mod suppression_repo;
pub mod traits;

use std::sync::Arc;

pub use batch_repo::BatchRepository;
pub use job_repo::JobRepository;
pub use memory::MemoryStore;
pub use recipient_repo::RecipientRepository;
pub use suppression_repo::SuppressionRepository;
pub use traits::{BatchStore, DirectoryRemoval, JobStore, RecipientDirectory, SuppressionStore};

use crate::db::AsyncDbPool;

/// Aggregates the stores behind their trait objects. Cloning is cheap.
#[derive(Clone)]
pub struct Repositories {
    pub jobs: Arc<dyn JobStore>,
    pub batches: Arc<dyn BatchStore>,
    pub suppressions: Arc<dyn SuppressionStore>,
    pub directory: Arc<dyn RecipientDirectory>,
}

impl Repositories {
    /// Postgres repositories sharing one connection pool.
    pub fn postgres(pool: AsyncDbPool) -> Self {
        Self {
            jobs: Arc::new(JobRepository::new(pool.clone())),
            batches: Arc::new(BatchRepository::new(pool.clone())),
            suppressions: Arc::new(SuppressionRepository::new(pool.clone())),
            directory: Arc::new(RecipientRepository::new(pool)),
        }
    }

    /// Every seam served by the same in-process store.
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            jobs: store.clone(),
            batches: store.clone(),
            suppressions: store.clone(),
            directory: store,
        }
    }
}
