//! Keyed storage for the four entities. All uniqueness and atomicity
//! guarantees live here: slug-keyed upserts for metadata, `(tx_hash,
//! log_index)` dedup for trades, and the single-transaction trade-batch +
//! sync-state commit.

use chrono::{SecondsFormat, Utc};
use sqlx::SqlitePool;
use tracing::warn;

use crate::config::MAX_PAGE_LIMIT;
use crate::db::models::{EventRow, MarketRow, TradeRow};
use crate::db::MIGRATOR;
use crate::error::{AppError, Result};
use crate::types::{normalize_token_id, EventMeta, MarketMeta, Trade};

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; None when this is the final page.
    pub next_cursor: Option<i64>,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -----------------------------------------------------------------------
    // Metadata upserts
    // -----------------------------------------------------------------------

    /// Insert or update an event keyed by slug. Unchanged payloads are a
    /// no-op: `updated_at` only moves when a field actually changed.
    pub async fn upsert_event(&self, event: &EventMeta) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (source_id, slug, title, description, neg_risk, active, closed, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                source_id = excluded.source_id,
                title = excluded.title,
                description = excluded.description,
                neg_risk = excluded.neg_risk,
                active = excluded.active,
                closed = excluded.closed,
                updated_at = excluded.updated_at
            WHERE events.source_id IS NOT excluded.source_id
               OR events.title IS NOT excluded.title
               OR events.description IS NOT excluded.description
               OR events.neg_risk IS NOT excluded.neg_risk
               OR events.active IS NOT excluded.active
               OR events.closed IS NOT excluded.closed
            "#,
        )
        .bind(&event.source_id)
        .bind(&event.slug)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.neg_risk as i64)
        .bind(event.active as i64)
        .bind(event.closed as i64)
        .bind(&event.created_at)
        .bind(now_iso())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or update a market keyed by slug. A token id already claimed by
    /// a different market, or a condition-id collision across slugs, breaks
    /// the one-market-per-token invariant and is fatal.
    pub async fn upsert_market(&self, market: &MarketMeta) -> Result<()> {
        let clash: Option<String> = sqlx::query_scalar(
            r#"
            SELECT slug FROM markets
            WHERE slug != ?
              AND (yes_token_id IN (?, ?) OR no_token_id IN (?, ?))
            LIMIT 1
            "#,
        )
        .bind(&market.slug)
        .bind(&market.yes_token_id)
        .bind(&market.no_token_id)
        .bind(&market.yes_token_id)
        .bind(&market.no_token_id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(other) = clash {
            return Err(AppError::StorageInvariant(format!(
                "market {}: outcome token already mapped to market {other}",
                market.slug
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO markets (event_slug, slug, title, condition_id, question_id,
                                 yes_token_id, no_token_id, neg_risk, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                event_slug = excluded.event_slug,
                title = excluded.title,
                condition_id = excluded.condition_id,
                question_id = excluded.question_id,
                yes_token_id = excluded.yes_token_id,
                no_token_id = excluded.no_token_id,
                neg_risk = excluded.neg_risk,
                status = excluded.status,
                updated_at = excluded.updated_at
            WHERE markets.event_slug IS NOT excluded.event_slug
               OR markets.title IS NOT excluded.title
               OR markets.condition_id IS NOT excluded.condition_id
               OR markets.question_id IS NOT excluded.question_id
               OR markets.yes_token_id IS NOT excluded.yes_token_id
               OR markets.no_token_id IS NOT excluded.no_token_id
               OR markets.neg_risk IS NOT excluded.neg_risk
               OR markets.status IS NOT excluded.status
            "#,
        )
        .bind(&market.event_slug)
        .bind(&market.slug)
        .bind(&market.title)
        .bind(&market.condition_id)
        .bind(&market.question_id)
        .bind(&market.yes_token_id)
        .bind(&market.no_token_id)
        .bind(market.neg_risk as i64)
        .bind(&market.status)
        .bind(&market.created_at)
        .bind(now_iso())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
                AppError::StorageInvariant(format!(
                    "market {}: condition id {} already belongs to another market",
                    market.slug, market.condition_id
                ))
            } else {
                AppError::Database(e)
            }
        })?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Trade batch + sync state
    // -----------------------------------------------------------------------

    /// Commit a scanned block range: trade upserts and the sync-state advance
    /// in ONE transaction. A crash mid-call rolls back both. Returns the
    /// number of rows actually inserted; duplicates count zero.
    pub async fn commit_trades(
        &self,
        trades: &[Trade],
        sync_key: &str,
        to_block: u64,
    ) -> Result<u64> {
        let now = now_iso();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for t in trades {
            let res = sqlx::query(
                r#"
                INSERT OR IGNORE INTO trades (tx_hash, log_index, block_number, timestamp,
                                              token_id, maker, taker, side, price, size, fee, exchange)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&t.tx_hash)
            .bind(t.log_index as i64)
            .bind(t.block_number as i64)
            .bind(t.timestamp.map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true)))
            .bind(&t.token_id)
            .bind(&t.maker)
            .bind(&t.taker)
            .bind(t.side.to_string())
            .bind(t.price.to_string())
            .bind(t.size.to_string())
            .bind(t.fee.to_string())
            .bind(&t.exchange)
            .execute(&mut *tx)
            .await?;
            inserted += res.rows_affected();
        }

        // last_block never regresses, even if a caller replays an old range.
        sqlx::query(
            r#"
            INSERT INTO sync_state (key, last_block, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                last_block = MAX(sync_state.last_block, excluded.last_block),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(sync_key)
        .bind(to_block as i64)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn sync_state(&self, key: &str) -> Result<Option<u64>> {
        let last: Option<i64> =
            sqlx::query_scalar("SELECT last_block FROM sync_state WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(last.map(|v| v as u64))
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn event_by_slug(&self, slug: &str) -> Result<Option<EventRow>> {
        let row = sqlx::query_as::<_, EventRow>("SELECT * FROM events WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn markets_of_event(&self, event_slug: &str) -> Result<Vec<MarketRow>> {
        let rows = sqlx::query_as::<_, MarketRow>(
            "SELECT * FROM markets WHERE event_slug = ? ORDER BY id ASC",
        )
        .bind(event_slug)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn market_by_slug(&self, slug: &str) -> Result<Option<MarketRow>> {
        let row = sqlx::query_as::<_, MarketRow>("SELECT * FROM markets WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn market_by_token(&self, token_id: &str) -> Result<Option<MarketRow>> {
        let Some(token) = normalize_token_id(token_id) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, MarketRow>(
            "SELECT * FROM markets WHERE yes_token_id = ? OR no_token_id = ?",
        )
        .bind(&token)
        .bind(&token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Trades touching either outcome token of a market, ascending by
    /// insertion sequence. The market join happens here, at read time:
    /// trades ingested before discovery still surface once the market lands.
    pub async fn trades_of_market(
        &self,
        market: &MarketRow,
        limit: i64,
        cursor: Option<i64>,
    ) -> Result<Page<TradeRow>> {
        let limit = clamp_limit(limit);
        let rows = sqlx::query_as::<_, TradeRow>(
            r#"
            SELECT * FROM trades
            WHERE token_id IN (?, ?) AND seq > ?
            ORDER BY seq ASC
            LIMIT ?
            "#,
        )
        .bind(&market.yes_token_id)
        .bind(&market.no_token_id)
        .bind(cursor.unwrap_or(0))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(page(rows, limit))
    }

    pub async fn trades_of_token(
        &self,
        token_id: &str,
        limit: i64,
        cursor: Option<i64>,
    ) -> Result<Page<TradeRow>> {
        let limit = clamp_limit(limit);
        let Some(token) = normalize_token_id(token_id) else {
            return Ok(Page { items: Vec::new(), next_cursor: None });
        };
        let rows = sqlx::query_as::<_, TradeRow>(
            r#"
            SELECT * FROM trades
            WHERE token_id = ? AND seq > ?
            ORDER BY seq ASC
            LIMIT ?
            "#,
        )
        .bind(&token)
        .bind(cursor.unwrap_or(0))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(page(rows, limit))
    }

    pub async fn token_has_trades(&self, token_id: &str) -> Result<bool> {
        let Some(token) = normalize_token_id(token_id) else {
            return Ok(false);
        };
        let seq: Option<i64> =
            sqlx::query_scalar("SELECT seq FROM trades WHERE token_id = ? LIMIT 1")
                .bind(&token)
                .fetch_optional(&self.pool)
                .await?;
        Ok(seq.is_some())
    }

    // -----------------------------------------------------------------------
    // Operator actions
    // -----------------------------------------------------------------------

    /// Drop and recreate every table. Explicit operator action only.
    pub async fn reset(&self) -> Result<()> {
        warn!("resetting database: all indexed data will be dropped");
        for table in ["trades", "markets", "events", "sync_state", "_sqlx_migrations"] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
                .execute(&self.pool)
                .await?;
        }
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_PAGE_LIMIT)
}

/// A full page may have more rows behind it; a short page is final.
fn page(rows: Vec<TradeRow>, limit: i64) -> Page<TradeRow> {
    let next_cursor = if rows.len() as i64 == limit {
        rows.last().map(|r| r.seq)
    } else {
        None
    };
    Page { items: rows, next_cursor }
}
