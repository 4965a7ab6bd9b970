// API server implementation using actix-web

use crate::api::models::ApiContext;
use crate::api::{auth, middleware, routes};
use crate::database_ops::db::Db;
use crate::util::env::{collector_utc_offset, env_opt, env_req};
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use chrono::FixedOffset;
use std::time::Instant;

pub struct ApiServer {
    pub host: String,
    pub port: u16,
    pub api_secret: String,
    pub allowed_origins: String,
    pub utc_offset: FixedOffset,
}

impl ApiServer {
    /// Create server from environment variables
    pub fn from_env() -> Result<Self> {
        crate::util::env::init_env();

        let host = env_opt("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = env_opt("API_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .context("Invalid API_PORT")?;

        let api_secret = env_req("API_SECRET").context("API_SECRET environment variable is required")?;

        let allowed_origins = env_opt("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://localhost:8000".to_string());

        let utc_offset = collector_utc_offset()?;

        Ok(Self {
            host,
            port,
            api_secret,
            allowed_origins,
            utc_offset,
        })
    }

    /// Start the HTTP server
    pub async fn run(self, db: Db) -> Result<()> {
        let bind_addr = format!("{}:{}", self.host, self.port);

        tracing::info!(
            host = %self.host,
            port = %self.port,
            "Starting ranking API server"
        );

        let db_data = web::Data::new(db);
        let ctx = web::Data::new(ApiContext {
            started: Instant::now(),
            utc_offset: self.utc_offset,
        });
        let api_secret = self.api_secret.clone();
        let allowed_origins = self.allowed_origins.clone();

        HttpServer::new(move || {
            let (logger, compress) = middleware::setup_middleware();
            let cors = middleware::setup_cors(&allowed_origins);
            let auth = auth::Auth::new(api_secret.clone());

            App::new()
                .app_data(db_data.clone())
                .app_data(ctx.clone())
                .wrap(auth)
                .wrap(cors)
                .wrap(compress)
                .wrap(logger)
                .configure(routes::configure_routes)
        })
        .bind(&bind_addr)
        .with_context(|| format!("Failed to bind to {}", bind_addr))?
        .run()
        .await
        .context("HTTP server error")?;

        Ok(())
    }
}
