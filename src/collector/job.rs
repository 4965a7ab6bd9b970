use chrono::{DateTime, Days, Utc};
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::config::JobSettings;
use super::{FetchError, FetchOutcome, RankingSource, RankingStore};
use crate::database_ops::db::StoreError;
use crate::normalization::ranking::{normalize, truncate_chars, NormalizeError};

/// Longest error text persisted to `job_state.message`.
pub const MAX_ERROR_MESSAGE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every pending genre was handled and the cursor cleared.
    Completed { processed: usize, swept: u64 },
    /// The runtime budget ran out; the next run resumes at `next_genre`.
    TimeBoxed { processed: usize, next_genre: i64 },
}

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("fetch failed for genre_id={genre_id}: {source}")]
    Fetch { genre_id: i64, source: FetchError },
    #[error("malformed response for genre_id={genre_id}: {source}")]
    Malformed { genre_id: i64, source: NormalizeError },
    #[error("write failed for genre_id={genre_id}: {source}")]
    Write { genre_id: i64, source: StoreError },
    #[error("job state update failed: {0}")]
    State(#[source] StoreError),
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// One sequential pass over the active genres, resuming after the stored cursor.
pub struct Collector<S, R> {
    source: S,
    store: R,
    settings: JobSettings,
    clock: Clock,
}

impl<S: RankingSource, R: RankingStore> Collector<S, R> {
    pub fn new(source: S, store: R, settings: JobSettings) -> Self {
        Self {
            source,
            store,
            settings,
            clock: Box::new(Utc::now),
        }
    }

    /// Replace the wall clock used for `captured_at` and the local day.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn run(&self) -> Result<RunOutcome, CollectorError> {
        let started = Instant::now();
        let now = (self.clock)();
        let today = self.settings.local_date(now);
        let job = self.settings.job_name.as_str();

        self.store
            .mark_running(job, now, today)
            .await
            .map_err(CollectorError::State)?;
        let cursor = self.store.load_cursor(job).await.map_err(CollectorError::State)?;
        let genres = self
            .store
            .active_genres_after(cursor)
            .await
            .map_err(CollectorError::State)?;
        info!(job, ?cursor, pending = genres.len(), %today, "collector run started");

        let mut processed = 0usize;
        for genre_id in genres {
            if started.elapsed() > self.settings.max_runtime {
                let message = format!("time limit reached before genre_id={genre_id}");
                self.store
                    .finish_ok(job, &message, true)
                    .await
                    .map_err(CollectorError::State)?;
                warn!(job, processed, next_genre = genre_id, "time limit reached; stopping");
                return Ok(RunOutcome::TimeBoxed {
                    processed,
                    next_genre: genre_id,
                });
            }

            let outcome = self
                .source
                .fetch(genre_id)
                .await
                .map_err(|source| CollectorError::Fetch { genre_id, source })?;

            match outcome {
                FetchOutcome::InvalidGenre { status, .. } => {
                    self.store
                        .deactivate_genre(genre_id)
                        .await
                        .map_err(|source| CollectorError::Write { genre_id, source })?;
                    self.store
                        .advance_cursor(job, genre_id, &format!("skipped genre_id={genre_id} (HTTP {status})"))
                        .await
                        .map_err(CollectorError::State)?;
                    warn!(genre_id, status, "genre rejected by source; deactivated");
                }
                FetchOutcome::Ranked(raw) => {
                    let rows = normalize(&raw, self.settings.hits)
                        .map_err(|source| CollectorError::Malformed { genre_id, source })?;
                    let written = self
                        .store
                        .commit_rankings(genre_id, today, now, &rows)
                        .await
                        .map_err(|source| CollectorError::Write { genre_id, source })?;
                    self.store
                        .advance_cursor(job, genre_id, &format!("processed genre_id={genre_id}"))
                        .await
                        .map_err(CollectorError::State)?;
                    processed += 1;
                    info!(genre_id, written, processed, "genre processed");
                }
            }

            tokio::time::sleep(self.settings.sleep).await;
        }

        let mut swept = 0;
        if self.settings.keep_days > 0 {
            if let Some(before) = today.checked_sub_days(Days::new(self.settings.keep_days.into())) {
                swept = self
                    .store
                    .sweep_rankings(before)
                    .await
                    .map_err(CollectorError::State)?;
            }
        }

        let message = format!("done. genres_processed={processed}");
        self.store
            .finish_ok(job, &message, false)
            .await
            .map_err(CollectorError::State)?;
        info!(job, processed, swept, elapsed_ms = %started.elapsed().as_millis(), "collector run finished");
        Ok(RunOutcome::Completed { processed, swept })
    }

    /// `run`, plus a best-effort `error` record in `job_state` when it fails.
    pub async fn run_guarded(&self) -> Result<RunOutcome, CollectorError> {
        let err = match self.run().await {
            Ok(outcome) => return Ok(outcome),
            Err(e) => e,
        };
        error!(error = %err, "collector run failed");

        let now = (self.clock)();
        let today = self.settings.local_date(now);
        let message = truncate_chars(&err.to_string(), MAX_ERROR_MESSAGE);
        if let Err(e) = self
            .store
            .record_failure(&self.settings.job_name, now, today, &message)
            .await
        {
            error!(error = %e, "could not record failure in job_state");
        }
        Err(err)
    }
}
