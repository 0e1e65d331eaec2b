//! Database row types. Used by sqlx for typed queries; booleans are stored
//! as SQLite integers.

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct EventRow {
    pub id: i64,
    pub source_id: Option<String>,
    pub slug: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub neg_risk: i64,
    pub active: i64,
    pub closed: i64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MarketRow {
    pub id: i64,
    pub event_slug: String,
    pub slug: String,
    pub title: Option<String>,
    pub condition_id: String,
    pub question_id: Option<String>,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub neg_risk: i64,
    pub status: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TradeRow {
    /// Monotonic insertion-order id; the pagination cursor.
    pub seq: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub timestamp: Option<String>,
    pub token_id: String,
    pub maker: String,
    pub taker: String,
    pub side: String,
    pub price: String,
    pub size: String,
    pub fee: String,
    pub exchange: Option<String>,
}
