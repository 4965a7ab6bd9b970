// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check (no auth required)
        .route("/health", web::get().to(handlers::health_check))
        .route("/", web::get().to(handlers::health_check))
        // API v1 routes (all require authentication)
        .service(
            web::scope("/api/v1")
                // Genre tree
                .route("/genres", web::get().to(handlers::list_genres))
                .route("/genres/roots", web::get().to(handlers::list_root_genres))
                .route("/genres/{id}", web::get().to(handlers::get_genre))
                .route(
                    "/genres/{id}/children",
                    web::get().to(handlers::list_child_genres),
                )
                .route(
                    "/genres/{id}/active",
                    web::post().to(handlers::set_genre_active),
                )
                // Rankings
                .route(
                    "/genres/{id}/rankings/latest",
                    web::get().to(handlers::latest_rankings),
                )
                .route("/genres/{id}/stats", web::get().to(handlers::rank_stats))
                // Collector state
                .route("/jobs", web::get().to(handlers::list_jobs)),
        );
}
