//! Bulk import job queries (`bulk_processing` table)

use async_trait::async_trait;
use sqlx::PgPool;

use crate::services::store::{JobStore, StoreError};
use crate::types::ImportJob;

/// PostgreSQL-backed job store
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, job: &ImportJob) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO bulk_processing (
                job_id, status, total_records, processed_records,
                success_records, failed_records, error_message, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&job.job_id)
        .bind(job.status)
        .bind(job.total_records as i32)
        .bind(job.processed_records as i32)
        .bind(job.success_records as i32)
        .bind(job.failed_records as i32)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("Job {} already exists", job.job_id))
            }
            _ => StoreError::Database(e),
        })?;

        Ok(())
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<ImportJob>, StoreError> {
        let job = sqlx::query_as::<_, ImportJob>(
            r#"
            SELECT job_id, status, total_records, processed_records,
                   success_records, failed_records, error_message, created_at, updated_at
            FROM bulk_processing
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn update_job(&self, job: &ImportJob) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_processing
            SET status = $2,
                total_records = $3,
                processed_records = $4,
                success_records = $5,
                failed_records = $6,
                error_message = $7,
                updated_at = $8
            WHERE job_id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(&job.job_id)
        .bind(job.status)
        .bind(job.total_records as i32)
        .bind(job.processed_records as i32)
        .bind(job.success_records as i32)
        .bind(job.failed_records as i32)
        .bind(&job.error_message)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // Nothing updated: either unknown or already finished
        match self.find_job(&job.job_id).await? {
            Some(_) => Err(StoreError::Conflict(format!("Job {} is already finished", job.job_id))),
            None => Err(StoreError::NotFound(format!("Job not found with id: {}", job.job_id))),
        }
    }
}
