use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{postgres::PgRow, Postgres, QueryBuilder, Row};
use tracing::{info, instrument};

use crate::database_ops::db::{Db, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenreRow {
    pub genre_id: i64,
    pub parent_genre_id: Option<i64>,
    pub genre_name: String,
    pub depth: i32,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl GenreRow {
    fn from_row(r: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            genre_id: r.try_get("genre_id")?,
            parent_genre_id: r.try_get("parent_genre_id")?,
            genre_name: r.try_get("genre_name")?,
            depth: r.try_get("depth")?,
            is_active: r.try_get("is_active")?,
            updated_at: r.try_get("updated_at")?,
        })
    }
}

/// Genre plus the number of direct children, for detail views.
#[derive(Debug, Clone, Serialize)]
pub struct GenreDetail {
    #[serde(flatten)]
    pub genre: GenreRow,
    pub child_count: i64,
}

/// Which parent a listed genre must hang off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParentFilter {
    #[default]
    Any,
    Root,
    Id(i64),
}

impl ParentFilter {
    /// `""` means any parent, `"null"` means roots, digits mean that parent.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(str::trim) {
            None | Some("") => Some(Self::Any),
            Some(s) if s.eq_ignore_ascii_case("null") => Some(Self::Root),
            Some(s) => s.parse().ok().map(Self::Id),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenreFilter {
    /// Matched against the name and the decimal id.
    pub q: Option<String>,
    pub parent: ParentFilter,
    pub active_only: bool,
}

/// A genre as supplied by an operator seed file.
#[derive(Debug, Clone, PartialEq)]
pub struct GenreSeed {
    pub genre_id: i64,
    pub parent_genre_id: Option<i64>,
    pub genre_name: String,
    pub depth: i32,
    pub is_active: bool,
}

const GENRE_COLUMNS: &str =
    "genre_id, parent_genre_id, genre_name, depth, is_active, updated_at";

impl Db {
    /// Active genre ids in ascending order, strictly after `cursor` when given.
    #[instrument(skip(self))]
    pub async fn active_genres_after(&self, cursor: Option<i64>) -> Result<Vec<i64>, StoreError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT genre_id FROM genres
             WHERE is_active = TRUE AND ($1::BIGINT IS NULL OR genre_id > $1)
             ORDER BY genre_id ASC",
        )
        .persistent(false)
        .bind(cursor)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    #[instrument(skip(self))]
    pub async fn deactivate_genre(&self, genre_id: i64) -> Result<(), StoreError> {
        self.set_genre_active(genre_id, false).await.map(|_| ())
    }

    /// Returns false when no such genre exists.
    #[instrument(skip(self))]
    pub async fn set_genre_active(&self, genre_id: i64, is_active: bool) -> Result<bool, StoreError> {
        let res = sqlx::query(
            "UPDATE genres SET is_active = $2, updated_at = now() WHERE genre_id = $1",
        )
        .persistent(false)
        .bind(genre_id)
        .bind(is_active)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub async fn list_genres(&self, filter: &GenreFilter) -> Result<Vec<GenreRow>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {GENRE_COLUMNS} FROM genres WHERE TRUE"));
        if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let pattern = format!("%{q}%");
            qb.push(" AND (genre_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR genre_id::TEXT LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        match filter.parent {
            ParentFilter::Any => {}
            ParentFilter::Root => {
                qb.push(" AND parent_genre_id IS NULL");
            }
            ParentFilter::Id(pid) => {
                qb.push(" AND parent_genre_id = ").push_bind(pid);
            }
        }
        if filter.active_only {
            qb.push(" AND is_active = TRUE");
        }
        qb.push(" ORDER BY depth ASC, genre_name ASC");

        let rows = qb.build().persistent(false).fetch_all(&self.pool).await?;
        rows.iter().map(GenreRow::from_row).map(|r| r.map_err(StoreError::from)).collect()
    }

    /// Direct children of `parent`, or the roots when `parent` is `None`.
    #[instrument(skip(self))]
    pub async fn genre_children(&self, parent: Option<i64>) -> Result<Vec<GenreRow>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {GENRE_COLUMNS} FROM genres
             WHERE parent_genre_id IS NOT DISTINCT FROM $1
             ORDER BY genre_name ASC"
        ))
        .persistent(false)
        .bind(parent)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(GenreRow::from_row).map(|r| r.map_err(StoreError::from)).collect()
    }

    #[instrument(skip(self))]
    pub async fn get_genre(&self, genre_id: i64) -> Result<Option<GenreDetail>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {GENRE_COLUMNS},
                    (SELECT COUNT(*) FROM genres c WHERE c.parent_genre_id = g.genre_id) AS child_count
             FROM genres g WHERE genre_id = $1"
        ))
        .persistent(false)
        .bind(genre_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(Some(GenreDetail {
                genre: GenreRow::from_row(&r)?,
                child_count: r.try_get("child_count")?,
            })),
            None => Ok(None),
        }
    }

    /// Insert or refresh seed rows in one transaction; returns rows written.
    #[instrument(skip(self, seeds), fields(n = seeds.len()))]
    pub async fn upsert_genres(&self, seeds: &[GenreSeed]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        for s in seeds {
            sqlx::query(
                "INSERT INTO genres (genre_id, parent_genre_id, genre_name, depth, is_active, updated_at)
                 VALUES ($1, $2, $3, $4, $5, now())
                 ON CONFLICT (genre_id) DO UPDATE SET
                    parent_genre_id = EXCLUDED.parent_genre_id,
                    genre_name = EXCLUDED.genre_name,
                    depth = EXCLUDED.depth,
                    is_active = EXCLUDED.is_active,
                    updated_at = now()",
            )
            .persistent(false)
            .bind(s.genre_id)
            .bind(s.parent_genre_id)
            .bind(&s.genre_name)
            .bind(s.depth)
            .bind(s.is_active)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!(written = seeds.len(), "genres upserted");
        Ok(seeds.len())
    }
}

#[cfg(test)]
mod tests {
    use super::ParentFilter;

    #[test]
    fn parent_filter_accepts_null_and_ids() {
        assert_eq!(ParentFilter::parse(None), Some(ParentFilter::Any));
        assert_eq!(ParentFilter::parse(Some(" ")), Some(ParentFilter::Any));
        assert_eq!(ParentFilter::parse(Some("null")), Some(ParentFilter::Root));
        assert_eq!(ParentFilter::parse(Some("NULL")), Some(ParentFilter::Root));
        assert_eq!(ParentFilter::parse(Some("100283")), Some(ParentFilter::Id(100283)));
        assert_eq!(ParentFilter::parse(Some("abc")), None);
    }
}
