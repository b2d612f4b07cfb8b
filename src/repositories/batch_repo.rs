use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use jiff::Timestamp;

use crate::db::{AsyncDbPool, get_connection};
use crate::error::{AppError, AppResult, DatabaseErrorConverter};
use crate::models::{
    BatchCounts, BatchStatus, BatchStatusView, DeliveryBatch, DeliveryBatchRow, DeliveryResult,
    DeliveryResultRow, NewDeliveryBatch, NewDeliveryBatchRow, NewDeliveryResultRow,
};
use crate::repositories::traits::BatchStore;
use crate::schema::{delivery_batches, delivery_results};

/// Postgres-backed delivery batch store.
#[derive(Clone)]
pub struct BatchRepository {
    pool: AsyncDbPool,
}

impl BatchRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }

    fn not_found(id: i64) -> AppError {
        AppError::not_found("DeliveryBatch", "id", id)
    }
}

#[async_trait]
impl BatchStore for BatchRepository {
    async fn create(&self, batch: NewDeliveryBatch, now: Timestamp) -> AppResult<DeliveryBatch> {
        let mut conn = get_connection(&self.pool).await?;

        diesel::insert_into(delivery_batches::table)
            .values(NewDeliveryBatchRow::new(batch, now))
            .returning(DeliveryBatchRow::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "create delivery batch"))?
            .into_batch(Vec::new())
    }

    async fn get(&self, id: i64) -> AppResult<DeliveryBatch> {
        let mut conn = get_connection(&self.pool).await?;

        let row = delivery_batches::table
            .find(id)
            .select(DeliveryBatchRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "load delivery batch"))?
            .ok_or_else(|| Self::not_found(id))?;

        let results = delivery_results::table
            .filter(delivery_results::batch_id.eq(id))
            .order(delivery_results::position.asc())
            .select(DeliveryResultRow::as_select())
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "load delivery results"))?;

        row.into_batch(results.into_iter().map(DeliveryResult::from).collect())
    }

    async fn status(&self, id: i64) -> AppResult<BatchStatusView> {
        let mut conn = get_connection(&self.pool).await?;

        let row = delivery_batches::table
            .find(id)
            .select(DeliveryBatchRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "load batch status"))?
            .ok_or_else(|| Self::not_found(id))?;

        Ok(BatchStatusView {
            id: row.id,
            status: row.status,
            total: row.total_recipients,
            success_count: row.success_count,
            failure_count: row.failure_count,
            error_message: row.error_message,
        })
    }

    async fn set_total(&self, id: i64, total: i32) -> AppResult<()> {
        let mut conn = get_connection(&self.pool).await?;

        let affected = diesel::update(
            delivery_batches::table
                .find(id)
                .filter(delivery_batches::status.eq(BatchStatus::Processing))
                .filter(
                    (delivery_batches::success_count + delivery_batches::failure_count).le(total),
                ),
        )
        .set(delivery_batches::total_recipients.eq(total))
        .execute(&mut conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "set batch total"))?;

        if affected == 0 {
            return Err(AppError::invalid_state(format!(
                "batch {} is not processing or already has more than {} results",
                id, total
            )));
        }
        Ok(())
    }

    async fn append_result(&self, id: i64, result: &DeliveryResult) -> AppResult<BatchCounts> {
        let mut conn = get_connection(&self.pool).await?;
        let (success_delta, failure_delta) = if result.success { (1, 0) } else { (0, 1) };

        conn.transaction::<_, AppError, _>(|conn| {
            async move {
                // The counter update locks the batch row, serializing appenders.
                let counts: Option<(i32, i32, i32)> = diesel::update(
                    delivery_batches::table
                        .find(id)
                        .filter(delivery_batches::status.eq(BatchStatus::Processing))
                        .filter(
                            (delivery_batches::success_count + delivery_batches::failure_count)
                                .lt(delivery_batches::total_recipients),
                        ),
                )
                .set((
                    delivery_batches::success_count
                        .eq(delivery_batches::success_count + success_delta),
                    delivery_batches::failure_count
                        .eq(delivery_batches::failure_count + failure_delta),
                ))
                .returning((
                    delivery_batches::total_recipients,
                    delivery_batches::success_count,
                    delivery_batches::failure_count,
                ))
                .get_result(conn)
                .await
                .optional()?;

                let Some((total, success_count, failure_count)) = counts else {
                    return Err(AppError::invalid_state(format!(
                        "batch {} does not accept more results",
                        id
                    )));
                };

                let position = success_count + failure_count - 1;
                diesel::insert_into(delivery_results::table)
                    .values(NewDeliveryResultRow::new(id, position, result))
                    .execute(conn)
                    .await?;

                Ok(BatchCounts {
                    total,
                    success_count,
                    failure_count,
                })
            }
            .scope_boxed()
        })
        .await
    }

    async fn finalize(
        &self,
        id: i64,
        status: BatchStatus,
        error: Option<&str>,
        now: Timestamp,
    ) -> AppResult<bool> {
        let mut conn = get_connection(&self.pool).await?;

        let affected = diesel::update(
            delivery_batches::table
                .find(id)
                .filter(delivery_batches::status.eq(BatchStatus::Processing)),
        )
        .set((
            delivery_batches::status.eq(status),
            delivery_batches::error_message.eq(error),
            delivery_batches::completed_at.eq(jiff_diesel::Timestamp::from(now)),
        ))
        .execute(&mut conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "finalize batch"))?;

        Ok(affected == 1)
    }

    async fn claim_run(&self, id: i64, now: Timestamp, cutoff: Timestamp) -> AppResult<bool> {
        let mut conn = get_connection(&self.pool).await?;

        let affected = diesel::update(
            delivery_batches::table
                .find(id)
                .filter(delivery_batches::status.eq(BatchStatus::Processing))
                .filter(
                    delivery_batches::run_claimed_at
                        .is_null()
                        .or(delivery_batches::run_claimed_at
                            .lt(jiff_diesel::Timestamp::from(cutoff))),
                ),
        )
        .set(delivery_batches::run_claimed_at.eq(jiff_diesel::Timestamp::from(now)))
        .execute(&mut conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "claim batch run"))?;

        Ok(affected == 1)
    }

    async fn release_run(&self, id: i64) -> AppResult<()> {
        let mut conn = get_connection(&self.pool).await?;

        diesel::update(
            delivery_batches::table
                .find(id)
                .filter(delivery_batches::status.eq(BatchStatus::Processing)),
        )
        .set(delivery_batches::run_claimed_at.eq(None::<jiff_diesel::Timestamp>))
        .execute(&mut conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "release batch run"))?;

        Ok(())
    }

    async fn list_finished_ids(&self, after_id: i64, limit: i64) -> AppResult<Vec<i64>> {
        let mut conn = get_connection(&self.pool).await?;

        delivery_batches::table
            .filter(delivery_batches::status.ne(BatchStatus::Processing))
            .filter(delivery_batches::id.gt(after_id))
            .order(delivery_batches::id.asc())
            .limit(limit)
            .select(delivery_batches::id)
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "list finished batches"))
    }
}
