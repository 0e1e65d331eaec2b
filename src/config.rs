use crate::error::{AppError, Result};

pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";
pub const RPC_URL: &str = "https://polygon-rpc.com";

/// Polymarket CTF Exchange on Polygon.
pub const EXCHANGE_ADDRESS: &str = "0x4bFb41d5B3570DeFd03C39a9A4d8dE6bd8B8982E";
/// Neg-risk variant of the exchange. Both emit the same fill event.
pub const NEG_RISK_EXCHANGE_ADDRESS: &str = "0xC5D563A36AE78145C45A50134D48A1215220E0A8";

/// Scanning cursor identity for the fill scanner.
pub const DEFAULT_SYNC_KEY: &str = "trade_sync";

/// Maximum blocks per eth_getLogs request. Public Polygon RPCs reject
/// wider ranges.
pub const LOG_CHUNK_SIZE: u64 = 4000;

/// With no sync state and no explicit FROM_BLOCK, start this many blocks
/// behind the chain head.
pub const GENESIS_LOOKBACK: u64 = 10;

/// Trade page size bounds for the query API.
pub const DEFAULT_PAGE_LIMIT: i64 = 100;
pub const MAX_PAGE_LIMIT: i64 = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub gamma_api_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Exchange contracts to scan for fill logs (EXCHANGE_ADDRESSES, comma-separated).
    pub exchange_addresses: Vec<String>,
    /// Scanning cursor key (SYNC_KEY)
    pub sync_key: String,
    /// Max blocks per eth_getLogs request (LOG_CHUNK_SIZE)
    pub log_chunk_size: u64,
    /// Per-request timeout in seconds (REQUEST_TIMEOUT_SECS)
    pub request_timeout_secs: u64,
    /// Gamma retry attempts (MAX_RETRIES)
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds (RETRY_BASE_DELAY_MS)
    pub retry_base_delay_ms: u64,
    /// Event to discover before scanning (EVENT_SLUG)
    pub event_slug: Option<String>,
    /// Explicit scan bounds (FROM_BLOCK / TO_BLOCK); both optional, see
    /// resume semantics in the scanner.
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    /// Seed both bounds from a known transaction (TX_HASH)
    pub tx_hash: Option<String>,
    /// Restrict stored trades to these token ids (FILTER_TOKENS, comma-separated)
    pub filter_tokens: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            rpc_url: std::env::var("RPC_URL").unwrap_or_else(|_| RPC_URL.to_string()),
            gamma_api_url: std::env::var("GAMMA_API_URL")
                .unwrap_or_else(|_| GAMMA_API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "indexer.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            exchange_addresses: std::env::var("EXCHANGE_ADDRESSES")
                .unwrap_or_else(|_| format!("{EXCHANGE_ADDRESS},{NEG_RISK_EXCHANGE_ADDRESS}"))
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            sync_key: std::env::var("SYNC_KEY").unwrap_or_else(|_| DEFAULT_SYNC_KEY.to_string()),
            log_chunk_size: parse_env_or("LOG_CHUNK_SIZE", LOG_CHUNK_SIZE),
            request_timeout_secs: parse_env_or("REQUEST_TIMEOUT_SECS", 20),
            max_retries: parse_env_or("MAX_RETRIES", 4),
            retry_base_delay_ms: parse_env_or("RETRY_BASE_DELAY_MS", 1500),
            event_slug: env_opt("EVENT_SLUG"),
            from_block: env_opt("FROM_BLOCK")
                .map(|v| {
                    v.parse::<u64>()
                        .map_err(|_| AppError::Config("FROM_BLOCK must be a block number".to_string()))
                })
                .transpose()?,
            to_block: env_opt("TO_BLOCK")
                .map(|v| {
                    v.parse::<u64>()
                        .map_err(|_| AppError::Config("TO_BLOCK must be a block number".to_string()))
                })
                .transpose()?,
            tx_hash: env_opt("TX_HASH"),
            filter_tokens: std::env::var("FILTER_TOKENS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
