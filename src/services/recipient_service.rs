use std::sync::Arc;

use crate::error::AppResult;
use crate::models::{RecipientCandidate, Target};
use crate::repositories::RecipientDirectory;

/// Expands a target into the candidates it addresses.
#[derive(Clone)]
pub struct RecipientService {
    directory: Arc<dyn RecipientDirectory>,
}

impl RecipientService {
    pub fn new(directory: Arc<dyn RecipientDirectory>) -> Self {
        Self { directory }
    }

    /// Community members, or the registrants of one event. Unknown events
    /// fail with `NotFound`.
    pub async fn resolve(&self, target: &Target) -> AppResult<Vec<RecipientCandidate>> {
        let candidates = match target {
            Target::Community => self.directory.list_pool_members().await?,
            Target::Event(event_id) => self.directory.list_event_registrants(*event_id).await?,
        };

        tracing::debug!(%target, count = candidates.len(), "Resolved recipients");
        Ok(candidates)
    }
}
