use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::path::PathBuf;
use std::time::Duration;

use super::client::SourceConfig;
use crate::util::env::{collector_utc_offset, env_opt, env_parse, env_req};
use tracing::warn;

pub const DEFAULT_ENDPOINT: &str =
    "https://app.rakuten.co.jp/services/api/IchibaItem/Ranking/20170628";
pub const DEFAULT_JOB_NAME: &str = "rakuten_rank_daily";
pub const LOCK_FILE_NAME: &str = "rank_collector_daily.lock";

/// Keys echoed (redacted) in the startup configuration snapshot.
pub const SNAPSHOT_KEYS: &[&str] = &[
    "DATABASE_URL",
    "RANKING_ENDPOINT",
    "RANKING_APPLICATION_ID",
    "RANKING_HITS",
    "RANKING_PERIOD",
    "COLLECTOR_JOB_NAME",
    "COLLECTOR_MAX_RUNTIME_SECS",
    "COLLECTOR_SLEEP_MS",
    "COLLECTOR_KEEP_DAYS",
    "COLLECTOR_UTC_OFFSET_HOURS",
    "COLLECTOR_LOCK_PATH",
    "HTTP_RETRY_ATTEMPTS",
    "AUTO_MIGRATE",
];

/// Loop parameters for one collector run.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub job_name: String,
    pub hits: u32,
    pub max_runtime: Duration,
    /// Pause after every genre, including skipped ones.
    pub sleep: Duration,
    /// Days of `rank_daily` to keep; 0 disables the sweep.
    pub keep_days: u32,
    /// Offset of the catalog's local day, used for `captured_date`.
    pub utc_offset: FixedOffset,
}

impl JobSettings {
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.utc_offset).date_naive()
    }
}

/// The ranking endpoint serves at most this many entries per page.
pub const MAX_HITS: u32 = 30;

fn clamp_hits(requested: u32) -> u32 {
    let hits = requested.clamp(1, MAX_HITS);
    if hits != requested {
        warn!(requested, using = hits, "RANKING_HITS outside 1..={MAX_HITS}; clamped");
    }
    hits
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub source: SourceConfig,
    pub job: JobSettings,
    pub lock_path: PathBuf,
}

impl CollectorConfig {
    pub fn from_env() -> Result<Self> {
        let hits = clamp_hits(env_parse("RANKING_HITS", MAX_HITS));
        let utc_offset = collector_utc_offset()?;

        let source = SourceConfig {
            endpoint: env_opt("RANKING_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            application_id: env_req("RANKING_APPLICATION_ID")?,
            hits,
            period: env_opt("RANKING_PERIOD"),
            connect_timeout: Duration::from_secs(env_parse("HTTP_CONNECT_TIMEOUT_SECS", 10u64)),
            timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 25u64)),
            retry_attempts: env_parse("HTTP_RETRY_ATTEMPTS", 3u32).max(1),
            retry_wait: Duration::from_millis(env_parse("HTTP_RETRY_WAIT_MS", 700u64)),
        };

        let job = JobSettings {
            job_name: env_opt("COLLECTOR_JOB_NAME").unwrap_or_else(|| DEFAULT_JOB_NAME.to_string()),
            hits,
            max_runtime: Duration::from_secs(env_parse("COLLECTOR_MAX_RUNTIME_SECS", 600u64)),
            sleep: Duration::from_millis(env_parse("COLLECTOR_SLEEP_MS", 1050u64)),
            keep_days: env_parse("COLLECTOR_KEEP_DAYS", 14u32),
            utc_offset,
        };

        let lock_path = env_opt("COLLECTOR_LOCK_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join(LOCK_FILE_NAME));

        Ok(Self {
            source,
            job,
            lock_path,
        })
    }
}
