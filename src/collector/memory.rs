//! In-memory `RankingStore` and scripted `RankingSource` for driving the collector loop in tests.
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use super::{FetchError, FetchOutcome, RankingSource, RankingStore};
use crate::database_ops::db::StoreError;
use crate::database_ops::job_state::JobStatus;
use crate::normalization::ranking::RankedItem;

#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub status: JobStatus,
    pub message: String,
    pub cursor: Option<i64>,
    pub last_run_at: DateTime<Utc>,
    pub last_run_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyRecord {
    pub item_code: String,
    pub price: Option<i64>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryState {
    pub genres: BTreeMap<i64, bool>,
    pub jobs: HashMap<String, JobRecord>,
    pub items: HashMap<String, ItemRecord>,
    pub rank_daily: BTreeMap<(NaiveDate, i64, i32), DailyRecord>,
    pub fail_commit_for: HashSet<i64>,
    pub fail_record_failure: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    pub state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn with_genres(ids: &[i64]) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().genres = ids.iter().map(|&id| (id, true)).collect();
        store
    }

    pub fn job(&self, job: &str) -> Option<JobRecord> {
        self.state.lock().unwrap().jobs.get(job).cloned()
    }

    pub fn is_active(&self, genre_id: i64) -> Option<bool> {
        self.state.lock().unwrap().genres.get(&genre_id).copied()
    }

    /// `(rank_pos, item_code)` rows for one genre and day.
    pub fn ranks(&self, date: NaiveDate, genre_id: i64) -> Vec<(i32, String)> {
        self.state
            .lock()
            .unwrap()
            .rank_daily
            .iter()
            .filter(|((d, g, _), _)| *d == date && *g == genre_id)
            .map(|((_, _, pos), rec)| (*pos, rec.item_code.clone()))
            .collect()
    }

    pub fn rank_dates(&self) -> Vec<NaiveDate> {
        let st = self.state.lock().unwrap();
        let mut dates: Vec<NaiveDate> = st.rank_daily.keys().map(|(d, _, _)| *d).collect();
        dates.dedup();
        dates
    }

    pub fn insert_daily(&self, date: NaiveDate, genre_id: i64, rank_pos: i32, item_code: &str) {
        self.state.lock().unwrap().rank_daily.insert(
            (date, genre_id, rank_pos),
            DailyRecord {
                item_code: item_code.into(),
                price: None,
                captured_at: Utc::now(),
            },
        );
    }
}

#[async_trait]
impl RankingStore for MemoryStore {
    async fn mark_running(
        &self,
        job: &str,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<(), StoreError> {
        let mut st = self.state.lock().unwrap();
        let cursor = st.jobs.get(job).and_then(|j| j.cursor);
        st.jobs.insert(
            job.to_string(),
            JobRecord {
                status: JobStatus::Running,
                message: "started".into(),
                cursor,
                last_run_at: now,
                last_run_date: today,
            },
        );
        Ok(())
    }

    async fn load_cursor(&self, job: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.state.lock().unwrap().jobs.get(job).and_then(|j| j.cursor))
    }

    async fn active_genres_after(&self, cursor: Option<i64>) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .genres
            .iter()
            .filter(|(id, active)| **active && cursor.is_none_or(|c| **id > c))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn deactivate_genre(&self, genre_id: i64) -> Result<(), StoreError> {
        if let Some(active) = self.state.lock().unwrap().genres.get_mut(&genre_id) {
            *active = false;
        }
        Ok(())
    }

    async fn commit_rankings(
        &self,
        genre_id: i64,
        captured_date: NaiveDate,
        captured_at: DateTime<Utc>,
        rows: &[RankedItem],
    ) -> Result<usize, StoreError> {
        let mut st = self.state.lock().unwrap();
        if st.fail_commit_for.contains(&genre_id) {
            return Err(StoreError::Rejected(format!("injected failure for genre {genre_id}")));
        }
        for row in rows {
            let first_seen_at = st
                .items
                .get(&row.item_code)
                .map(|i| i.first_seen_at)
                .unwrap_or(captured_at);
            st.items.insert(
                row.item_code.clone(),
                ItemRecord {
                    first_seen_at,
                    last_seen_at: captured_at,
                },
            );
            st.rank_daily.insert(
                (captured_date, genre_id, row.rank_pos),
                DailyRecord {
                    item_code: row.item_code.clone(),
                    price: row.price,
                    captured_at,
                },
            );
        }
        Ok(rows.len())
    }

    async fn advance_cursor(&self, job: &str, genre_id: i64, message: &str) -> Result<(), StoreError> {
        if let Some(j) = self.state.lock().unwrap().jobs.get_mut(job) {
            j.cursor = Some(genre_id);
            j.message = message.to_string();
        }
        Ok(())
    }

    async fn finish_ok(&self, job: &str, message: &str, keep_cursor: bool) -> Result<(), StoreError> {
        if let Some(j) = self.state.lock().unwrap().jobs.get_mut(job) {
            j.status = JobStatus::Ok;
            j.message = message.to_string();
            if !keep_cursor {
                j.cursor = None;
            }
        }
        Ok(())
    }

    async fn sweep_rankings(&self, before: NaiveDate) -> Result<u64, StoreError> {
        let mut st = self.state.lock().unwrap();
        let n = st.rank_daily.len();
        st.rank_daily.retain(|(d, _, _), _| *d >= before);
        Ok((n - st.rank_daily.len()) as u64)
    }

    async fn record_failure(
        &self,
        job: &str,
        now: DateTime<Utc>,
        today: NaiveDate,
        message: &str,
    ) -> Result<(), StoreError> {
        let mut st = self.state.lock().unwrap();
        if st.fail_record_failure {
            return Err(StoreError::Rejected("job_state unavailable".into()));
        }
        let cursor = st.jobs.get(job).and_then(|j| j.cursor);
        st.jobs.insert(
            job.to_string(),
            JobRecord {
                status: JobStatus::Error,
                message: message.to_string(),
                cursor,
                last_run_at: now,
                last_run_date: today,
            },
        );
        Ok(())
    }
}

/// One canned answer for a genre fetch.
#[derive(Debug, Clone)]
pub enum Reply {
    Ranked(Value),
    Invalid(u16),
    Transient(u16, String),
}

/// Answers per genre from a queue; an exhausted or missing queue yields an empty ranking.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    replies: Mutex<HashMap<i64, VecDeque<Reply>>>,
    pub calls: Mutex<Vec<i64>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, genre_id: i64, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(genre_id)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RankingSource for ScriptedSource {
    async fn fetch(&self, genre_id: i64) -> Result<FetchOutcome, FetchError> {
        self.calls.lock().unwrap().push(genre_id);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&genre_id)
            .and_then(VecDeque::pop_front);
        match reply {
            Some(Reply::Ranked(v)) => Ok(FetchOutcome::Ranked(v)),
            Some(Reply::Invalid(status)) => Ok(FetchOutcome::InvalidGenre {
                status,
                body: r#"{"error":"wrong_parameter"}"#.into(),
            }),
            Some(Reply::Transient(status, detail)) => Err(FetchError::Transient {
                genre_id,
                status: Some(status),
                detail,
                attempts: 3,
            }),
            None => Ok(FetchOutcome::Ranked(serde_json::json!({ "Items": [] }))),
        }
    }
}
