use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::Row;
use tracing::{debug, info, instrument};

use crate::database_ops::db::{Db, StoreError};
use crate::normalization::ranking::RankedItem;

pub const LATEST_ROWS_LIMIT: i64 = 200;
pub const STATS_ROWS_LIMIT: i64 = 300;
pub const STATS_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct LatestRankingRow {
    pub rank_pos: i32,
    pub item_code: String,
    pub price: Option<i64>,
    pub review_count: Option<i64>,
    pub point_rate: Option<i64>,
    pub item_name: Option<String>,
    pub item_url: Option<String>,
    pub image_url: Option<String>,
    pub shop_name: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Most recent snapshot of one genre; `captured_date` is `None` when nothing was collected yet.
#[derive(Debug, Clone, Serialize)]
pub struct LatestRanking {
    pub genre_id: i64,
    pub captured_date: Option<NaiveDate>,
    pub rows: Vec<LatestRankingRow>,
}

/// Per-item aggregate over the trailing window of `rank_daily`.
#[derive(Debug, Clone, Serialize)]
pub struct RankStat {
    pub item_code: String,
    pub appear_days: i64,
    pub best_rank: i32,
    pub avg_rank: f64,
    pub last_seen_date: NaiveDate,
    pub last_rank: i32,
    pub item_name: Option<String>,
    pub item_url: Option<String>,
    pub image_url: Option<String>,
    pub shop_name: Option<String>,
    pub price_last: Option<i64>,
    pub review_count_last: Option<i64>,
    pub point_rate_last: Option<i64>,
}

impl Db {
    /// Write one genre's snapshot atomically: items first, then the daily rank rows.
    /// Dropping the transaction on error rolls back everything written for this genre.
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn commit_rankings(
        &self,
        genre_id: i64,
        captured_date: NaiveDate,
        captured_at: DateTime<Utc>,
        rows: &[RankedItem],
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO items (item_code, item_name, item_url, image_url, shop_code, shop_name,
                                    price_last, review_count_last, point_rate_last, first_seen_at, last_seen_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
                 ON CONFLICT (item_code) DO UPDATE SET
                    item_name = EXCLUDED.item_name,
                    item_url = EXCLUDED.item_url,
                    image_url = EXCLUDED.image_url,
                    shop_code = EXCLUDED.shop_code,
                    shop_name = EXCLUDED.shop_name,
                    price_last = EXCLUDED.price_last,
                    review_count_last = EXCLUDED.review_count_last,
                    point_rate_last = EXCLUDED.point_rate_last,
                    last_seen_at = EXCLUDED.last_seen_at",
            )
            .persistent(false)
            .bind(&row.item_code)
            .bind(&row.item_name)
            .bind(&row.item_url)
            .bind(&row.image_url)
            .bind(&row.shop_code)
            .bind(&row.shop_name)
            .bind(row.price)
            .bind(row.review_count)
            .bind(row.point_rate)
            .bind(captured_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO rank_daily (captured_date, genre_id, rank_pos, item_code,
                                         price, review_count, point_rate, captured_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (captured_date, genre_id, rank_pos) DO UPDATE SET
                    item_code = EXCLUDED.item_code,
                    price = EXCLUDED.price,
                    review_count = EXCLUDED.review_count,
                    point_rate = EXCLUDED.point_rate,
                    captured_at = EXCLUDED.captured_at",
            )
            .persistent(false)
            .bind(captured_date)
            .bind(genre_id)
            .bind(row.rank_pos)
            .bind(&row.item_code)
            .bind(row.price)
            .bind(row.review_count)
            .bind(row.point_rate)
            .bind(captured_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(genre_id, %captured_date, written = rows.len(), "rankings committed");
        Ok(rows.len())
    }

    /// Delete daily rows captured strictly before `before`.
    #[instrument(skip(self))]
    pub async fn sweep_rankings(&self, before: NaiveDate) -> Result<u64, StoreError> {
        let res = sqlx::query("DELETE FROM rank_daily WHERE captured_date < $1")
            .persistent(false)
            .bind(before)
            .execute(&self.pool)
            .await?;
        info!(%before, deleted = res.rows_affected(), "rank_daily swept");
        Ok(res.rows_affected())
    }

    #[instrument(skip(self))]
    pub async fn latest_rankings(&self, genre_id: i64) -> Result<LatestRanking, StoreError> {
        let captured_date = sqlx::query_scalar::<_, Option<NaiveDate>>(
            "SELECT MAX(captured_date) FROM rank_daily WHERE genre_id = $1",
        )
        .persistent(false)
        .bind(genre_id)
        .fetch_one(&self.pool)
        .await?;

        let Some(date) = captured_date else {
            return Ok(LatestRanking {
                genre_id,
                captured_date: None,
                rows: Vec::new(),
            });
        };

        let rows = sqlx::query(
            "SELECT rd.rank_pos, rd.item_code, rd.price, rd.review_count, rd.point_rate,
                    i.item_name, i.item_url, i.image_url, i.shop_name, i.last_seen_at
             FROM rank_daily rd
             LEFT JOIN items i ON i.item_code = rd.item_code
             WHERE rd.genre_id = $1 AND rd.captured_date = $2
             ORDER BY rd.rank_pos ASC
             LIMIT $3",
        )
        .persistent(false)
        .bind(genre_id)
        .bind(date)
        .bind(LATEST_ROWS_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(LatestRankingRow {
                rank_pos: r.try_get("rank_pos")?,
                item_code: r.try_get("item_code")?,
                price: r.try_get("price")?,
                review_count: r.try_get("review_count")?,
                point_rate: r.try_get("point_rate")?,
                item_name: r.try_get("item_name")?,
                item_url: r.try_get("item_url")?,
                image_url: r.try_get("image_url")?,
                shop_name: r.try_get("shop_name")?,
                last_seen_at: r.try_get("last_seen_at")?,
            });
        }
        Ok(LatestRanking {
            genre_id,
            captured_date: Some(date),
            rows: out,
        })
    }

    /// Aggregates over the `STATS_WINDOW_DAYS` days ending at `today`.
    #[instrument(skip(self))]
    pub async fn rank_stats(&self, genre_id: i64, today: NaiveDate) -> Result<Vec<RankStat>, StoreError> {
        let since = today - chrono::Duration::days(STATS_WINDOW_DAYS - 1);
        let rows = sqlx::query(
            "WITH windowed AS (
                SELECT item_code, captured_date, rank_pos
                FROM rank_daily
                WHERE genre_id = $1 AND captured_date >= $2
             ),
             agg AS (
                SELECT item_code,
                       COUNT(DISTINCT captured_date) AS appear_days,
                       MIN(rank_pos) AS best_rank,
                       AVG(rank_pos)::FLOAT8 AS avg_rank,
                       MAX(captured_date) AS last_seen_date
                FROM windowed
                GROUP BY item_code
             )
             SELECT a.item_code, a.appear_days, a.best_rank, a.avg_rank, a.last_seen_date,
                    (SELECT MIN(w.rank_pos) FROM windowed w
                     WHERE w.item_code = a.item_code AND w.captured_date = a.last_seen_date) AS last_rank,
                    i.item_name, i.item_url, i.image_url, i.shop_name,
                    i.price_last, i.review_count_last, i.point_rate_last
             FROM agg a
             LEFT JOIN items i ON i.item_code = a.item_code
             ORDER BY a.best_rank ASC, a.appear_days DESC, a.item_code ASC
             LIMIT $3",
        )
        .persistent(false)
        .bind(genre_id)
        .bind(since)
        .bind(STATS_ROWS_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(RankStat {
                item_code: r.try_get("item_code")?,
                appear_days: r.try_get("appear_days")?,
                best_rank: r.try_get("best_rank")?,
                avg_rank: r.try_get("avg_rank")?,
                last_seen_date: r.try_get("last_seen_date")?,
                last_rank: r.try_get("last_rank")?,
                item_name: r.try_get("item_name")?,
                item_url: r.try_get("item_url")?,
                image_url: r.try_get("image_url")?,
                shop_name: r.try_get("shop_name")?,
                price_last: r.try_get("price_last")?,
                review_count_last: r.try_get("review_count_last")?,
                point_rate_last: r.try_get("point_rate_last")?,
            });
        }
        Ok(out)
    }
}
