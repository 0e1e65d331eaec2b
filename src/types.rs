use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Normalized metadata
// ---------------------------------------------------------------------------

/// Event record normalized from a Gamma payload. `slug` is the human key;
/// `source_id` is whatever id Gamma assigned upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    pub source_id: Option<String>,
    pub slug: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub neg_risk: bool,
    pub active: bool,
    pub closed: bool,
    pub created_at: Option<String>,
}

/// Market record normalized from a Gamma payload. A well-formed market always
/// carries a condition id and two distinct outcome token ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMeta {
    pub event_slug: String,
    pub slug: String,
    pub title: Option<String>,
    pub condition_id: String,
    pub question_id: Option<String>,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub neg_risk: bool,
    pub status: String,
    pub created_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Which outcome token of a market a trade touched. Resolved at query time;
/// a trade whose market is not yet discovered stays Unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
    Unknown,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Yes => write!(f, "YES"),
            Outcome::No => write!(f, "NO"),
            Outcome::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// One decoded on-chain fill. `(tx_hash, log_index)` is globally unique;
/// rows are append-only once committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    /// Block timestamp; filled in by the scanner after decoding.
    pub timestamp: Option<DateTime<Utc>>,
    /// Canonical decimal string of the outcome token traded.
    pub token_id: String,
    pub maker: String,
    pub taker: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub fee: Decimal,
    pub exchange: String,
}

// ---------------------------------------------------------------------------
// Token id normalization
// ---------------------------------------------------------------------------

/// Canonicalize a token id to its decimal string form. Gamma and the chain
/// disagree on representation (quoted strings, 0x hex, decimal), so every
/// token id is normalized before storage or comparison.
pub fn normalize_token_id(raw: &str) -> Option<String> {
    let value = raw.trim().trim_matches('"').trim_matches('\'');
    if value.is_empty() {
        return None;
    }
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        return U256::from_str_radix(hex, 16).ok().map(|v| v.to_string());
    }
    if value.bytes().all(|b| b.is_ascii_digit()) {
        return U256::from_str_radix(value, 10).ok().map(|v| v.to_string());
    }
    Some(value.to_string())
}
