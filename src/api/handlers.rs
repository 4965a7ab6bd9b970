// HTTP request handlers for API endpoints

use crate::api::models::*;
use crate::database_ops::db::{Db, StoreError};
use crate::database_ops::rankings::STATS_WINDOW_DAYS;
use actix_web::{web, HttpResponse, Result};
use chrono::Utc;

fn db_failure(context: &str, e: StoreError) -> HttpResponse {
    tracing::error!(error = %e, context, "query failed");
    HttpResponse::InternalServerError().json(ApiResponse::<()>::error(format!("{context} failed")))
}

fn not_found(genre_id: i64) -> HttpResponse {
    HttpResponse::NotFound().json(ApiResponse::<()>::error(format!("genre {genre_id} not found")))
}

/// Health check endpoint
pub async fn health_check(db: web::Data<Db>, ctx: web::Data<ApiContext>) -> Result<HttpResponse> {
    // Quick database connectivity check
    let db_status = match sqlx::query_scalar::<_, bool>("SELECT true")
        .persistent(false)
        .fetch_one(&db.pool)
        .await
    {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    let response = ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        database: db_status.to_string(),
        uptime_seconds: ctx.started.elapsed().as_secs(),
    });

    Ok(HttpResponse::Ok().json(response))
}

/// List genres filtered by name/id substring, parent and active flag
pub async fn list_genres(
    query: web::Query<GenreListQuery>,
    db: web::Data<Db>,
) -> Result<HttpResponse> {
    let Some(filter) = query.to_filter() else {
        return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error("invalid parent_id")));
    };
    match db.list_genres(&filter).await {
        Ok(genres) => Ok(HttpResponse::Ok().json(ApiResponse::success(GenreList { genres }))),
        Err(e) => Ok(db_failure("list genres", e)),
    }
}

pub async fn list_root_genres(db: web::Data<Db>) -> Result<HttpResponse> {
    match db.genre_children(None).await {
        Ok(genres) => Ok(HttpResponse::Ok().json(ApiResponse::success(GenreList { genres }))),
        Err(e) => Ok(db_failure("list root genres", e)),
    }
}

pub async fn list_child_genres(path: web::Path<i64>, db: web::Data<Db>) -> Result<HttpResponse> {
    let genre_id = path.into_inner();
    match db.genre_children(Some(genre_id)).await {
        Ok(genres) => Ok(HttpResponse::Ok().json(ApiResponse::success(GenreList { genres }))),
        Err(e) => Ok(db_failure("list child genres", e)),
    }
}

/// Single genre with its direct child count
pub async fn get_genre(path: web::Path<i64>, db: web::Data<Db>) -> Result<HttpResponse> {
    let genre_id = path.into_inner();
    match db.get_genre(genre_id).await {
        Ok(Some(detail)) => Ok(HttpResponse::Ok().json(ApiResponse::success(detail))),
        Ok(None) => Ok(not_found(genre_id)),
        Err(e) => Ok(db_failure("get genre", e)),
    }
}

/// Rows of the most recent captured day for a genre
pub async fn latest_rankings(path: web::Path<i64>, db: web::Data<Db>) -> Result<HttpResponse> {
    let genre_id = path.into_inner();
    match db.latest_rankings(genre_id).await {
        Ok(latest) => Ok(HttpResponse::Ok().json(ApiResponse::success(latest))),
        Err(e) => Ok(db_failure("latest rankings", e)),
    }
}

/// Per-item aggregates over the trailing window
pub async fn rank_stats(
    path: web::Path<i64>,
    db: web::Data<Db>,
    ctx: web::Data<ApiContext>,
) -> Result<HttpResponse> {
    let genre_id = path.into_inner();
    let today = Utc::now().with_timezone(&ctx.utc_offset).date_naive();
    match db.rank_stats(genre_id, today).await {
        Ok(rows) => Ok(HttpResponse::Ok().json(ApiResponse::success(StatsResponse {
            genre_id,
            window_days: STATS_WINDOW_DAYS,
            rows,
        }))),
        Err(e) => Ok(db_failure("rank stats", e)),
    }
}

/// Toggle whether the collector visits a genre
pub async fn set_genre_active(
    path: web::Path<i64>,
    payload: web::Json<SetActiveRequest>,
    db: web::Data<Db>,
) -> Result<HttpResponse> {
    let genre_id = path.into_inner();
    tracing::info!(genre_id, is_active = payload.is_active, "genre active toggle requested");
    match db.set_genre_active(genre_id, payload.is_active).await {
        Ok(true) => Ok(HttpResponse::Ok().json(ApiResponse::success(SetActiveResponse {
            genre_id,
            is_active: payload.is_active,
        }))),
        Ok(false) => Ok(not_found(genre_id)),
        Err(e) => Ok(db_failure("set genre active", e)),
    }
}

/// All collector job state rows
pub async fn list_jobs(db: web::Data<Db>) -> Result<HttpResponse> {
    match db.list_job_states().await {
        Ok(jobs) => Ok(HttpResponse::Ok().json(ApiResponse::success(jobs))),
        Err(e) => Ok(db_failure("list jobs", e)),
    }
}
