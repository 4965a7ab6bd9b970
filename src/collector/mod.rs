//! Daily ranking collector: fetch per genre, normalize, upsert, advance the cursor.
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::database_ops::db::{Db, StoreError};
use crate::normalization::ranking::RankedItem;

pub mod client;
pub mod config;
pub mod job;
pub mod lock;

#[cfg(test)]
pub(crate) mod memory;

pub use client::{FetchError, FetchOutcome, RankingClient, SourceConfig};
pub use config::{CollectorConfig, JobSettings};
pub use job::{Collector, CollectorError, RunOutcome};
pub use lock::JobLock;

/// Where ranking documents come from.
#[async_trait]
pub trait RankingSource: Send + Sync {
    async fn fetch(&self, genre_id: i64) -> Result<FetchOutcome, FetchError>;
}

/// Persistence the collector loop needs: job state, genre selection and per-genre writes.
#[async_trait]
pub trait RankingStore: Send + Sync {
    async fn mark_running(
        &self,
        job: &str,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<(), StoreError>;

    async fn load_cursor(&self, job: &str) -> Result<Option<i64>, StoreError>;

    async fn active_genres_after(&self, cursor: Option<i64>) -> Result<Vec<i64>, StoreError>;

    async fn deactivate_genre(&self, genre_id: i64) -> Result<(), StoreError>;

    async fn commit_rankings(
        &self,
        genre_id: i64,
        captured_date: NaiveDate,
        captured_at: DateTime<Utc>,
        rows: &[RankedItem],
    ) -> Result<usize, StoreError>;

    async fn advance_cursor(&self, job: &str, genre_id: i64, message: &str)
        -> Result<(), StoreError>;

    async fn finish_ok(&self, job: &str, message: &str, keep_cursor: bool)
        -> Result<(), StoreError>;

    async fn sweep_rankings(&self, before: NaiveDate) -> Result<u64, StoreError>;

    async fn record_failure(
        &self,
        job: &str,
        now: DateTime<Utc>,
        today: NaiveDate,
        message: &str,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl RankingStore for Db {
    async fn mark_running(
        &self,
        job: &str,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<(), StoreError> {
        Db::mark_running(self, job, now, today).await
    }

    async fn load_cursor(&self, job: &str) -> Result<Option<i64>, StoreError> {
        Db::load_cursor(self, job).await
    }

    async fn active_genres_after(&self, cursor: Option<i64>) -> Result<Vec<i64>, StoreError> {
        Db::active_genres_after(self, cursor).await
    }

    async fn deactivate_genre(&self, genre_id: i64) -> Result<(), StoreError> {
        Db::deactivate_genre(self, genre_id).await
    }

    async fn commit_rankings(
        &self,
        genre_id: i64,
        captured_date: NaiveDate,
        captured_at: DateTime<Utc>,
        rows: &[RankedItem],
    ) -> Result<usize, StoreError> {
        Db::commit_rankings(self, genre_id, captured_date, captured_at, rows).await
    }

    async fn advance_cursor(
        &self,
        job: &str,
        genre_id: i64,
        message: &str,
    ) -> Result<(), StoreError> {
        Db::advance_cursor(self, job, genre_id, message).await
    }

    async fn finish_ok(&self, job: &str, message: &str, keep_cursor: bool) -> Result<(), StoreError> {
        Db::finish_ok(self, job, message, keep_cursor).await
    }

    async fn sweep_rankings(&self, before: NaiveDate) -> Result<u64, StoreError> {
        Db::sweep_rankings(self, before).await
    }

    async fn record_failure(
        &self,
        job: &str,
        now: DateTime<Utc>,
        today: NaiveDate,
        message: &str,
    ) -> Result<(), StoreError> {
        Db::record_failure(self, job, now, today, message).await
    }
}
