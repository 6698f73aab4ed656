//! Background job bookkeeping for multi-store commit batches.

use crate::domain::{BackgroundJob, JobStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{now_ms, period_col, Repository};

fn job_from_row(row: &SqliteRow) -> Result<BackgroundJob, sqlx::Error> {
    let status_raw: String = row.get("status");
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown job status '{status_raw}'").into()))?;

    Ok(BackgroundJob {
        id: row.get("id"),
        period: period_col(row)?,
        total: row.get("total"),
        processed: row.get("processed"),
        failed: row.get("failed"),
        status,
        error: row.get("error"),
        created_at_ms: row.get("created_at"),
        finished_at_ms: row.get("finished_at"),
    })
}

impl Repository {
    pub async fn create_job(&self, job: &BackgroundJob) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO background_jobs (
                id, period_year, period_month, total, processed, failed,
                status, error, created_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.period.year())
        .bind(job.period.month() as i64)
        .bind(job.total)
        .bind(job.processed)
        .bind(job.failed)
        .bind(job.status.as_str())
        .bind(job.error.as_deref())
        .bind(job.created_at_ms)
        .bind(job.finished_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<BackgroundJob>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, period_year, period_month, total, processed, failed,
                   status, error, created_at, finished_at
            FROM background_jobs WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Atomically add to a job's processed and failed counters.
    pub async fn record_job_progress(
        &self,
        id: &str,
        processed: i64,
        failed: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE background_jobs SET processed = processed + ?, failed = failed + ? WHERE id = ?",
        )
        .bind(processed)
        .bind(failed)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finish_job(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE background_jobs SET status = ?, error = ?, finished_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
