use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{postgres::PgRow, Row};
use std::fmt;
use std::str::FromStr;
use tracing::instrument;

use crate::database_ops::db::{Db, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Ok,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Ok => "ok",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "ok" => Ok(JobStatus::Ok),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("unknown job status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStateRow {
    pub job_name: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_date: Option<NaiveDate>,
    pub status: JobStatus,
    pub message: Option<String>,
    pub cursor_genre_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl JobStateRow {
    fn from_row(r: &PgRow) -> Result<Self, StoreError> {
        let status: String = r.try_get("status")?;
        Ok(Self {
            job_name: r.try_get("job_name")?,
            last_run_at: r.try_get("last_run_at")?,
            last_run_date: r.try_get("last_run_date")?,
            status: status.parse().map_err(StoreError::Rejected)?,
            message: r.try_get("message")?,
            cursor_genre_id: r.try_get("cursor_genre_id")?,
            updated_at: r.try_get("updated_at")?,
        })
    }
}

impl Db {
    /// Flag the run as started; creates the row on first use and never touches the cursor.
    #[instrument(skip(self))]
    pub async fn mark_running(
        &self,
        job: &str,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO job_state (job_name, last_run_at, last_run_date, status, message, cursor_genre_id, updated_at)
             VALUES ($1, $2, $3, 'running', 'started', NULL, now())
             ON CONFLICT (job_name) DO UPDATE SET
                last_run_at = EXCLUDED.last_run_at,
                last_run_date = EXCLUDED.last_run_date,
                status = 'running',
                message = 'started',
                updated_at = now()",
        )
        .persistent(false)
        .bind(job)
        .bind(now)
        .bind(today)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn load_cursor(&self, job: &str) -> Result<Option<i64>, StoreError> {
        let cursor = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT cursor_genre_id FROM job_state WHERE job_name = $1",
        )
        .persistent(false)
        .bind(job)
        .fetch_optional(&self.pool)
        .await?;
        Ok(cursor.flatten())
    }

    #[instrument(skip(self))]
    pub async fn advance_cursor(
        &self,
        job: &str,
        genre_id: i64,
        message: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE job_state SET cursor_genre_id = $2, message = $3, updated_at = now()
             WHERE job_name = $1",
        )
        .persistent(false)
        .bind(job)
        .bind(genre_id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark the run `ok`. A time-boxed run keeps its cursor; a completed pass clears it.
    #[instrument(skip(self))]
    pub async fn finish_ok(
        &self,
        job: &str,
        message: &str,
        keep_cursor: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE job_state SET
                status = 'ok',
                message = $2,
                cursor_genre_id = CASE WHEN $3 THEN cursor_genre_id ELSE NULL END,
                updated_at = now()
             WHERE job_name = $1",
        )
        .persistent(false)
        .bind(job)
        .bind(message)
        .bind(keep_cursor)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a fatal run error; the cursor is left for the next run to resume from.
    #[instrument(skip(self, message))]
    pub async fn record_failure(
        &self,
        job: &str,
        now: DateTime<Utc>,
        today: NaiveDate,
        message: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO job_state (job_name, last_run_at, last_run_date, status, message, cursor_genre_id, updated_at)
             VALUES ($1, $2, $3, 'error', $4, NULL, now())
             ON CONFLICT (job_name) DO UPDATE SET
                last_run_at = EXCLUDED.last_run_at,
                last_run_date = EXCLUDED.last_run_date,
                status = 'error',
                message = EXCLUDED.message,
                updated_at = now()",
        )
        .persistent(false)
        .bind(job)
        .bind(now)
        .bind(today)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn job_state(&self, job: &str) -> Result<Option<JobStateRow>, StoreError> {
        let row = sqlx::query(
            "SELECT job_name, last_run_at, last_run_date, status, message, cursor_genre_id, updated_at
             FROM job_state WHERE job_name = $1",
        )
        .persistent(false)
        .bind(job)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(JobStateRow::from_row).transpose()
    }

    #[instrument(skip(self))]
    pub async fn list_job_states(&self) -> Result<Vec<JobStateRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT job_name, last_run_at, last_run_date, status, message, cursor_genre_id, updated_at
             FROM job_state ORDER BY job_name ASC",
        )
        .persistent(false)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(JobStateRow::from_row).collect()
    }
}
