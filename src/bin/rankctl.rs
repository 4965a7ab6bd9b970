use anyhow::{bail, Context, Result};
use chrono::{Days, Utc};
use clap::{Parser, Subcommand};
use rank_collector::cli::import_genres;
use rank_collector::database_ops::db::Db;
use rank_collector::logging::{init_tracing, DEFAULT_FILTER};
use rank_collector::util::env as env_util;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rankctl", version, about = "Ranking collector admin CLI")]
struct Cli {
    /// Optional override for the database URL
    #[arg(long, global = true)]
    db_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Upsert genres from a CSV file (genre_id,parent_genre_id,genre_name,depth[,is_active])
    ImportGenres { path: PathBuf },
    /// Print every job_state row
    Jobs,
    /// Enable or disable collection for a genre
    SetActive {
        genre_id: i64,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
    /// Print the most recent ranking snapshot of a genre
    Latest { genre_id: i64 },
    /// Delete rank_daily rows older than N days
    Sweep {
        #[arg(long, default_value_t = 14)]
        keep_days: u64,
    },
    /// Apply pending files from ./migrations
    Migrate {
        #[arg(long, default_value = "migrations")]
        dir: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing(DEFAULT_FILTER)?;
    let cli = Cli::parse();

    let database_url = match cli.db_url.clone() {
        Some(url) => url,
        None => env_util::db_url()?,
    };
    let db = Db::connect_no_migrate(&database_url, 1)
        .await
        .context("connect to database")?;
    let result = dispatch(&db, cli.command).await;
    db.close().await;
    result
}

async fn dispatch(db: &Db, command: Commands) -> Result<()> {
    match command {
        Commands::ImportGenres { path } => {
            let written = import_genres::run(db, &path).await?;
            println!("imported {written} genres from {}", path.display());
        }
        Commands::Jobs => {
            for job in db.list_job_states().await? {
                println!(
                    "{:<24} {:<8} cursor={:<10} last_run_date={:<10} {}",
                    job.job_name,
                    job.status,
                    job.cursor_genre_id.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
                    job.last_run_date.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
                    job.message.unwrap_or_default(),
                );
            }
        }
        Commands::SetActive { genre_id, active } => {
            if !db.set_genre_active(genre_id, active).await? {
                bail!("genre {genre_id} not found");
            }
            println!("genre {genre_id} is_active={active}");
        }
        Commands::Latest { genre_id } => {
            let latest = db.latest_rankings(genre_id).await?;
            let Some(date) = latest.captured_date else {
                println!("no rankings captured for genre {genre_id}");
                return Ok(());
            };
            println!("genre {genre_id} captured_date={date}");
            for row in latest.rows {
                println!(
                    "{:>3}  {:<40} {:>8}  {}",
                    row.rank_pos,
                    row.item_code,
                    row.price.map(|p| p.to_string()).unwrap_or_default(),
                    row.item_name.unwrap_or_default(),
                );
            }
        }
        Commands::Sweep { keep_days } => {
            let offset = env_util::collector_utc_offset()?;
            let today = Utc::now().with_timezone(&offset).date_naive();
            let before = today
                .checked_sub_days(Days::new(keep_days))
                .context("keep-days too large")?;
            let deleted = db.sweep_rankings(before).await?;
            println!("deleted {deleted} rank_daily rows before {before}");
        }
        Commands::Migrate { dir } => {
            let applied = db.run_migrations(Path::new(&dir)).await?;
            info!(applied, "migrate finished");
            println!("applied {applied} migration(s)");
        }
    }
    Ok(())
}
