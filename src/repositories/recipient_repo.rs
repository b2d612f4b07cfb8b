use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::db::{AsyncDbPool, get_connection};
use crate::error::{AppError, AppResult, DatabaseErrorConverter};
use crate::models::RecipientCandidate;
use crate::repositories::traits::{DirectoryRemoval, RecipientDirectory};
use crate::schema::{community_members, event_registrations, events};

/// Recipient pools backed by the community and event registration tables.
#[derive(Clone)]
pub struct RecipientRepository {
    pool: AsyncDbPool,
}

impl RecipientRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }
}

fn into_candidates(rows: Vec<(String, Option<String>)>) -> Vec<RecipientCandidate> {
    rows.into_iter()
        .map(|(phone, name)| RecipientCandidate { phone, name })
        .collect()
}

#[async_trait]
impl RecipientDirectory for RecipientRepository {
    async fn list_pool_members(&self) -> AppResult<Vec<RecipientCandidate>> {
        let mut conn = get_connection(&self.pool).await?;

        let rows = community_members::table
            .order(community_members::id.asc())
            .select((community_members::phone, community_members::name))
            .load::<(String, Option<String>)>(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "list pool members"))?;

        Ok(into_candidates(rows))
    }

    async fn list_event_registrants(&self, event_id: i64) -> AppResult<Vec<RecipientCandidate>> {
        let mut conn = get_connection(&self.pool).await?;

        let exists: bool = diesel::select(diesel::dsl::exists(events::table.find(event_id)))
            .get_result(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "look up event"))?;
        if !exists {
            return Err(AppError::not_found("Event", "id", event_id));
        }

        let rows = event_registrations::table
            .filter(event_registrations::event_id.eq(event_id))
            .order(event_registrations::id.asc())
            .select((event_registrations::phone, event_registrations::name))
            .load::<(String, Option<String>)>(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "list event registrants"))?;

        Ok(into_candidates(rows))
    }

    async fn remove_phones(&self, phones: &[String]) -> AppResult<DirectoryRemoval> {
        if phones.is_empty() {
            return Ok(DirectoryRemoval::default());
        }
        let mut conn = get_connection(&self.pool).await?;
        let phones = phones.to_vec();

        conn.transaction::<_, AppError, _>(|conn| {
            async move {
                let pool_members = diesel::delete(
                    community_members::table.filter(community_members::phone.eq_any(phones.clone())),
                )
                .execute(conn)
                .await?;

                let event_registrants = diesel::delete(
                    event_registrations::table
                        .filter(event_registrations::phone.eq_any(phones)),
                )
                .execute(conn)
                .await?;

                Ok(DirectoryRemoval {
                    pool_members,
                    event_registrants,
                })
            }
            .scope_boxed()
        })
        .await
    }
}
