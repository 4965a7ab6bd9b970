// API request/response models (DTOs)

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::database_ops::genres::{GenreFilter, ParentFilter};
use crate::util::env::parse_flag;

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: Some(Meta::now()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            meta: Some(Meta::now()),
        }
    }
}

/// Metadata included in all API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub version: String,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Shared per-server state handed to handlers.
#[derive(Debug, Clone)]
pub struct ApiContext {
    pub started: Instant,
    /// Offset of the catalog's local day; the stats window ends on that day.
    pub utc_offset: FixedOffset,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub uptime_seconds: u64,
}

/// `GET /genres` query string
#[derive(Debug, Default, Deserialize)]
pub struct GenreListQuery {
    pub q: Option<String>,
    /// Empty for any parent, `null` for roots, or a genre id.
    pub parent_id: Option<String>,
    pub active_only: Option<String>,
}

impl GenreListQuery {
    /// `None` when `parent_id` is neither empty, `null`, nor an integer.
    pub fn to_filter(&self) -> Option<GenreFilter> {
        Some(GenreFilter {
            q: self.q.clone(),
            parent: ParentFilter::parse(self.parent_id.as_deref())?,
            active_only: self.active_only.as_deref().is_some_and(parse_flag),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct GenreList<T> {
    pub genres: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse<T> {
    pub genre_id: i64,
    pub window_days: i64,
    pub rows: Vec<T>,
}

/// `POST /genres/{id}/active` body
#[derive(Debug, Serialize, Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct SetActiveResponse {
    pub genre_id: i64,
    pub is_active: bool,
}
