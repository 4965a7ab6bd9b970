use anyhow::Result;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    Connection, PgConnection, PgPool, Row,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use crate::util::env::env_flag;

/// Errors surfaced by the persistence layer to the collector loop.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Explicitly constructed database handle; opened once per run and passed down.
#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    /// Connect and apply `./migrations` when `AUTO_MIGRATE` is on (default: off).
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let db = Self::connect_no_migrate(database_url, max_connections).await?;
        if env_flag("AUTO_MIGRATE", false) {
            info!("running migrations (AUTO_MIGRATE=on, custom runner)");
            db.run_migrations(Path::new("./migrations")).await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping migrations");
        }
        Ok(db)
    }

    // Variant that NEVER runs migrations regardless of env.
    #[instrument(skip(database_url))]
    pub async fn connect_no_migrate(database_url: &str, max_connections: u32) -> Result<Self> {
        let use_prepared = env_flag("USE_PREPARED", false);
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !use_prepared {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await?;
        info!(max_connections, "connected to db");
        Ok(Self { pool })
    }

    /// Release every pooled connection; call once before the process exits.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Lightweight runner: applies `NNNN_name.sql` files in numeric order, once each.
    /// Concurrent runners serialize on a session advisory lock.
    pub async fn run_migrations(&self, dir: &Path) -> Result<usize> {
        if !dir.exists() {
            info!(dir = %dir.display(), "no migrations directory; nothing to apply");
            return Ok(0);
        }
        let mut conn = self.pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .persistent(false)
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;
        let result = apply_pending(&mut conn, dir).await;
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;
        result
    }
}

const MIGRATION_LOCK_KEY: i64 = 0x72616e6b; // "rank"

async fn apply_pending(conn: &mut PgConnection, dir: &Path) -> Result<usize> {
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS _sqlx_migrations (
            version BIGINT PRIMARY KEY,
            description TEXT,
            installed_at TIMESTAMPTZ DEFAULT now()
         )",
    )
    .execute(&mut *conn)
    .await?;

    let mut applied: HashSet<i64> = HashSet::new();
    for r in sqlx::raw_sql("SELECT version FROM _sqlx_migrations")
        .fetch_all(&mut *conn)
        .await?
    {
        applied.insert(r.try_get::<i64, _>(0)?);
    }

    let mut candidates: Vec<(i64, String, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some((version, desc)) = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(parse_migration_name)
        {
            candidates.push((version, desc, path));
        }
    }
    candidates.sort_by_key(|(v, _, _)| *v);

    let mut count = 0usize;
    for (version, desc, path) in candidates {
        if applied.contains(&version) {
            continue;
        }
        let sql = std::fs::read_to_string(&path)?;
        info!(version, file = ?path, "applying migration");
        let mut tx = conn.begin().await?;
        sqlx::raw_sql(sql.trim()).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO _sqlx_migrations(version, description) VALUES ($1, $2)")
            .persistent(false)
            .bind(version)
            .bind(&desc)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        applied.insert(version);
        count += 1;
    }
    info!(applied = count, "migrations up-to-date");
    Ok(count)
}

// pattern: digits '_' rest '.sql'
fn parse_migration_name(fname: &str) -> Option<(i64, String)> {
    let stem = fname.strip_suffix(".sql")?;
    let (num, rest) = stem.split_once('_')?;
    if num.is_empty() || !num.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((num.parse().ok()?, rest.to_string()))
}

#[cfg(test)]
mod tests {
    use super::parse_migration_name;

    #[test]
    fn migration_names_need_numeric_prefix() {
        assert_eq!(
            parse_migration_name("0001_init.sql"),
            Some((1, "init".to_string()))
        );
        assert_eq!(parse_migration_name("database_settings.sql"), None);
        assert_eq!(parse_migration_name("0002_notes.txt"), None);
        assert_eq!(parse_migration_name("_x.sql"), None);
    }
}
