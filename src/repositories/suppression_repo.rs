use std::collections::HashSet;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::{Bool, Int8, Nullable, Text, Timestamptz, Varchar};
use diesel_async::RunQueryDsl;
use jiff::Timestamp;

use crate::db::{AsyncDbPool, get_connection};
use crate::error::{AppResult, DatabaseErrorConverter};
use crate::models::{
    SuppressionCategory, SuppressionEntry, SuppressionEntryRow, SuppressionUpsert, UpsertOutcome,
};
use crate::repositories::traits::SuppressionStore;
use crate::schema::{sql_types, suppressions};

const UPSERT_SQL: &str = r#"
INSERT INTO suppressions (phone, category, name, reason, source, batch_id, created_at, updated_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
ON CONFLICT (category, phone) DO UPDATE SET
    reason = COALESCE(EXCLUDED.reason, suppressions.reason),
    name = COALESCE(EXCLUDED.name, suppressions.name),
    source = EXCLUDED.source,
    batch_id = COALESCE(EXCLUDED.batch_id, suppressions.batch_id),
    updated_at = EXCLUDED.updated_at
RETURNING (xmax = 0) AS inserted
"#;

#[derive(QueryableByName)]
struct UpsertRow {
    #[diesel(sql_type = Bool)]
    inserted: bool,
}

/// Postgres-backed suppression directory.
#[derive(Clone)]
pub struct SuppressionRepository {
    pool: AsyncDbPool,
}

impl SuppressionRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SuppressionStore for SuppressionRepository {
    async fn find_suppressed(
        &self,
        category: SuppressionCategory,
        phones: &[String],
    ) -> AppResult<HashSet<String>> {
        if phones.is_empty() {
            return Ok(HashSet::new());
        }
        let mut conn = get_connection(&self.pool).await?;

        let found: Vec<String> = suppressions::table
            .filter(suppressions::category.eq(category))
            .filter(suppressions::phone.eq_any(phones.to_vec()))
            .select(suppressions::phone)
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "find suppressed phones"))?;

        Ok(found.into_iter().collect())
    }

    async fn upsert(&self, entry: &SuppressionUpsert, now: Timestamp) -> AppResult<UpsertOutcome> {
        let mut conn = get_connection(&self.pool).await?;

        let row: UpsertRow = diesel::sql_query(UPSERT_SQL)
            .bind::<Varchar, _>(entry.phone.as_str())
            .bind::<sql_types::SuppressionCategory, _>(entry.category)
            .bind::<Nullable<Varchar>, _>(entry.name.as_deref())
            .bind::<Nullable<Text>, _>(entry.reason.as_deref())
            .bind::<Varchar, _>(entry.source.as_str())
            .bind::<Nullable<Int8>, _>(entry.batch_id)
            .bind::<Timestamptz, _>(jiff_diesel::Timestamp::from(now))
            .get_result(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "upsert suppression"))?;

        Ok(if row.inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn get(
        &self,
        category: SuppressionCategory,
        phone: &str,
    ) -> AppResult<Option<SuppressionEntry>> {
        let mut conn = get_connection(&self.pool).await?;

        let row = suppressions::table
            .filter(suppressions::category.eq(category))
            .filter(suppressions::phone.eq(phone))
            .select(SuppressionEntryRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "load suppression"))?;

        Ok(row.map(SuppressionEntry::from))
    }
}
