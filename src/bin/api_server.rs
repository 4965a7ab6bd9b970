// HTTP API server over the collected ranking history

use anyhow::Result;
use rank_collector::api::ApiServer;
use rank_collector::database_ops::db::Db;
use rank_collector::logging::{init_tracing, DEFAULT_FILTER};
use rank_collector::util::env as env_util;

#[actix_web::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing(DEFAULT_FILTER)?;

    tracing::info!("Initializing ranking API server");
    env_util::preflight_check(
        "api_server",
        &["API_SECRET"],
        &["DATABASE_URL", "API_HOST", "API_PORT", "API_SECRET", "ALLOWED_ORIGINS"],
    )?;

    let server = ApiServer::from_env()?;

    let database_url = env_util::db_url()?;
    let max_connections: u32 = env_util::env_parse("DB_MAX_CONNS", 10u32);
    let db = Db::connect(&database_url, max_connections).await?;

    tracing::info!("Database connected successfully");

    server.run(db).await?;

    Ok(())
}
