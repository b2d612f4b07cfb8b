use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use jiff::Timestamp;

use crate::db::{AsyncDbPool, get_connection};
use crate::error::{AppError, AppResult, DatabaseErrorConverter};
use crate::jobs::models::{NewScheduledJob, NewScheduledJobRow, ScheduledJob, ScheduledJobRow};
use crate::jobs::types::JobStatus;
use crate::repositories::traits::JobStore;
use crate::schema::scheduled_jobs;

/// Postgres-backed scheduled job store.
#[derive(Clone)]
pub struct JobRepository {
    pool: AsyncDbPool,
}

impl JobRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for JobRepository {
    async fn create(&self, job: NewScheduledJob, now: Timestamp) -> AppResult<ScheduledJob> {
        let mut conn = get_connection(&self.pool).await?;

        diesel::insert_into(scheduled_jobs::table)
            .values(NewScheduledJobRow::new(job, now))
            .returning(ScheduledJobRow::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "create scheduled job"))?
            .into_job()
    }

    async fn get(&self, id: i64) -> AppResult<ScheduledJob> {
        let mut conn = get_connection(&self.pool).await?;

        scheduled_jobs::table
            .find(id)
            .select(ScheduledJobRow::as_select())
            .first(&mut conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => AppError::not_found("ScheduledJob", "id", id),
                _ => AppError::from(e),
            })?
            .into_job()
    }

    async fn reclaim_stale(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
        reason: &str,
    ) -> AppResult<Vec<i64>> {
        let mut conn = get_connection(&self.pool).await?;

        diesel::update(
            scheduled_jobs::table
                .filter(scheduled_jobs::status.eq(JobStatus::Processing))
                .filter(
                    scheduled_jobs::processing_started_at.lt(jiff_diesel::Timestamp::from(cutoff)),
                ),
        )
        .set((
            scheduled_jobs::status.eq(JobStatus::Failed),
            scheduled_jobs::error_message.eq(reason),
            scheduled_jobs::completed_at.eq(jiff_diesel::Timestamp::from(now)),
        ))
        .returning(scheduled_jobs::id)
        .get_results(&mut conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "reclaim stale jobs"))
    }

    async fn find_due(&self, now: Timestamp) -> AppResult<Vec<ScheduledJob>> {
        let mut conn = get_connection(&self.pool).await?;

        let rows = scheduled_jobs::table
            .filter(scheduled_jobs::status.eq(JobStatus::Pending))
            .filter(scheduled_jobs::scheduled_at.le(jiff_diesel::Timestamp::from(now)))
            .order((scheduled_jobs::scheduled_at.asc(), scheduled_jobs::id.asc()))
            .select(ScheduledJobRow::as_select())
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "find due jobs"))?;

        rows.into_iter().map(ScheduledJobRow::into_job).collect()
    }

    async fn try_claim(&self, id: i64, now: Timestamp) -> AppResult<bool> {
        let mut conn = get_connection(&self.pool).await?;

        let affected = diesel::update(
            scheduled_jobs::table
                .find(id)
                .filter(scheduled_jobs::status.eq(JobStatus::Pending)),
        )
        .set((
            scheduled_jobs::status.eq(JobStatus::Processing),
            scheduled_jobs::processing_started_at.eq(jiff_diesel::Timestamp::from(now)),
        ))
        .execute(&mut conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "claim scheduled job"))?;

        Ok(affected == 1)
    }

    async fn attach_batch(&self, id: i64, batch_id: i64) -> AppResult<bool> {
        let mut conn = get_connection(&self.pool).await?;

        let affected = diesel::update(
            scheduled_jobs::table
                .find(id)
                .filter(scheduled_jobs::status.eq(JobStatus::Processing)),
        )
        .set(scheduled_jobs::batch_id.eq(batch_id))
        .execute(&mut conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "attach batch"))?;

        Ok(affected == 1)
    }

    async fn finish(
        &self,
        id: i64,
        status: JobStatus,
        error: Option<&str>,
        now: Timestamp,
    ) -> AppResult<bool> {
        let mut conn = get_connection(&self.pool).await?;

        let affected = diesel::update(
            scheduled_jobs::table
                .find(id)
                .filter(scheduled_jobs::status.eq(JobStatus::Processing)),
        )
        .set((
            scheduled_jobs::status.eq(status),
            scheduled_jobs::error_message.eq(error),
            scheduled_jobs::completed_at.eq(jiff_diesel::Timestamp::from(now)),
        ))
        .execute(&mut conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "finish scheduled job"))?;

        Ok(affected == 1)
    }

    async fn cancel(&self, id: i64, now: Timestamp) -> AppResult<bool> {
        let mut conn = get_connection(&self.pool).await?;

        let affected = diesel::update(
            scheduled_jobs::table
                .find(id)
                .filter(scheduled_jobs::status.eq(JobStatus::Pending)),
        )
        .set((
            scheduled_jobs::status.eq(JobStatus::Cancelled),
            scheduled_jobs::completed_at.eq(jiff_diesel::Timestamp::from(now)),
        ))
        .execute(&mut conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "cancel scheduled job"))?;

        Ok(affected == 1)
    }
}
