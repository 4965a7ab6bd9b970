use anyhow::{Context, Result};
use rank_collector::collector::config::SNAPSHOT_KEYS;
use rank_collector::collector::{Collector, CollectorConfig, JobLock, RankingClient, RunOutcome};
use rank_collector::database_ops::db::Db;
use rank_collector::logging::{init_tracing, DEFAULT_FILTER};
use rank_collector::util::env as env_util;
use std::process::ExitCode;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    env_util::init_env();
    if let Err(e) = init_tracing(DEFAULT_FILTER) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "collector exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn collect() -> Result<()> {
    env_util::preflight_check("rank-collector", &["RANKING_APPLICATION_ID"], SNAPSHOT_KEYS)?;
    let cfg = CollectorConfig::from_env()?;

    let Some(_lock) = JobLock::try_acquire(&cfg.lock_path)
        .with_context(|| format!("open lock file {}", cfg.lock_path.display()))?
    else {
        warn!(path = %cfg.lock_path.display(), "already running; exiting");
        return Ok(());
    };

    let database_url = env_util::db_url()?;
    let db = Db::connect(&database_url, 2)
        .await
        .context("connect to database")?;
    let client = RankingClient::new(cfg.source.clone()).context("build ranking client")?;

    let collector = Collector::new(client, db.clone(), cfg.job.clone());
    let result = collector.run_guarded().await;
    db.close().await;

    match result? {
        RunOutcome::Completed { processed, swept } => {
            info!(processed, swept, "collector finished");
        }
        RunOutcome::TimeBoxed {
            processed,
            next_genre,
        } => {
            info!(processed, next_genre, "collector stopped at time limit; will resume");
        }
    }
    Ok(())
}
