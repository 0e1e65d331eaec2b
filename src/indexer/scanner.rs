//! Trade scanner: pulls fill logs for a block range, decodes them, and
//! commits the batch together with the sync-state advance.
//!
//! All network work happens before the commit, so a timeout or cancellation
//! mid-scan leaves nothing behind and the identical range can be retried.
//! The commit itself is one uninterruptible transaction.

use std::collections::HashSet;
use std::sync::Arc;

use alloy::primitives::Address;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::chain::decoder::{decode_order_filled, order_filled_topic};
use crate::chain::LogSource;
use crate::config::GENESIS_LOOKBACK;
use crate::db::store::Store;
use crate::error::{AppError, Result};
use crate::types::{normalize_token_id, Trade};

#[derive(Debug, Clone, Copy)]
pub struct IndexOutcome {
    pub from_block: u64,
    pub to_block: u64,
    /// Rows actually inserted; replayed duplicates count zero.
    pub inserted: u64,
    /// Logs that did not decode. Surfaced for operator follow-up, never
    /// retried automatically.
    pub decode_skipped: u64,
}

pub struct TradeIndexer {
    store: Store,
    logs: Arc<dyn LogSource>,
    addresses: Vec<Address>,
    sync_key: String,
    /// One in-flight scan per sync key: sync-state advancement is serialized
    /// even if callers race.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TradeIndexer {
    pub fn new(
        store: Store,
        logs: Arc<dyn LogSource>,
        addresses: Vec<Address>,
        sync_key: String,
    ) -> Self {
        Self {
            store,
            logs,
            addresses,
            sync_key,
            locks: DashMap::new(),
        }
    }

    /// Scan `[from_block, to_block]` and commit decoded fills. Idempotent:
    /// replaying any sub-range inserts nothing new and never regresses the
    /// sync cursor.
    pub async fn index_range(
        &self,
        from_block: u64,
        to_block: u64,
        filter_tokens: Option<&[String]>,
    ) -> Result<IndexOutcome> {
        if from_block > to_block {
            return Err(AppError::InvalidRange(format!(
                "from_block {from_block} > to_block {to_block}"
            )));
        }

        let lock = self.lock_for(&self.sync_key);
        let _guard = lock.lock().await;

        let raw_logs = self
            .logs
            .get_logs(&self.addresses, order_filled_topic(), from_block, to_block)
            .await?;

        let keep: Option<HashSet<String>> = filter_tokens.map(|tokens| {
            tokens
                .iter()
                .filter_map(|t| normalize_token_id(t))
                .collect()
        });

        let mut trades: Vec<Trade> = Vec::with_capacity(raw_logs.len());
        let mut decode_skipped = 0u64;
        for raw in &raw_logs {
            match decode_order_filled(raw) {
                Ok(trade) => {
                    if keep.as_ref().is_some_and(|k| !k.contains(&trade.token_id)) {
                        continue;
                    }
                    trades.push(trade);
                }
                Err(AppError::Decode(why)) => {
                    warn!("skipping undecodable log: {why}");
                    decode_skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        // Timestamps come from the chain too; a failure here still precedes
        // the commit, so state is untouched.
        for trade in &mut trades {
            trade.timestamp = Some(self.logs.block_timestamp(trade.block_number).await?);
        }

        // Replay determinism: storage order follows log order.
        trades.sort_by_key(|t| (t.block_number, t.log_index));

        let inserted = self
            .store
            .commit_trades(&trades, &self.sync_key, to_block)
            .await?;

        info!(
            "Indexed blocks [{from_block}, {to_block}]: {inserted} new trades, {decode_skipped} skipped"
        );
        Ok(IndexOutcome {
            from_block,
            to_block,
            inserted,
            decode_skipped,
        })
    }

    /// Resolve the effective scan bounds. A known transaction seeds both
    /// ends; a missing lower bound resumes after the sync cursor, falling
    /// back to just behind the chain head on first run; a missing upper
    /// bound scans to the head.
    pub async fn resume_bounds(
        &self,
        from_block: Option<u64>,
        to_block: Option<u64>,
        tx_hash: Option<&str>,
    ) -> Result<(u64, u64)> {
        let mut from = from_block;
        let mut to = to_block;

        if let Some(tx) = tx_hash {
            let block = self.logs.block_of(tx).await?;
            from = from.or(Some(block));
            to = to.or(Some(block));
        }

        if let (Some(f), None) = (from, to) {
            to = Some(f);
        }

        let from = match from {
            Some(f) => f,
            None => match self.store.sync_state(&self.sync_key).await? {
                Some(last) => last + 1,
                None => self.logs.head_block().await?.saturating_sub(GENESIS_LOOKBACK),
            },
        };
        let to = match to {
            Some(t) => t,
            None => self.logs.head_block().await?,
        };

        if from > to {
            return Err(AppError::InvalidRange(format!(
                "resolved from_block {from} > to_block {to}"
            )));
        }
        Ok((from, to))
    }

    /// Operator convenience: where did this transaction land?
    pub async fn resolve_block(&self, tx_hash: &str) -> Result<u64> {
        self.logs.block_of(tx_hash).await
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::RawLog;
    use crate::db::MIGRATOR;
    use alloy::primitives::{B256, U256};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashMap;

    struct FakeChain {
        logs: Vec<RawLog>,
        tx_blocks: HashMap<String, u64>,
        head: u64,
        fail_get_logs: bool,
    }

    impl FakeChain {
        fn new(logs: Vec<RawLog>, head: u64) -> Self {
            Self {
                logs,
                tx_blocks: HashMap::new(),
                head,
                fail_get_logs: false,
            }
        }
    }

    #[async_trait]
    impl LogSource for FakeChain {
        async fn get_logs(
            &self,
            _addresses: &[Address],
            _topic0: B256,
            from_block: u64,
            to_block: u64,
        ) -> Result<Vec<RawLog>> {
            if self.fail_get_logs {
                return Err(AppError::SourceUnavailable("rpc down".to_string()));
            }
            Ok(self
                .logs
                .iter()
                .filter(|l| l.block_number >= from_block && l.block_number <= to_block)
                .cloned()
                .collect())
        }

        async fn block_of(&self, tx_hash: &str) -> Result<u64> {
            self.tx_blocks
                .get(tx_hash)
                .copied()
                .ok_or_else(|| AppError::NotFound(format!("transaction {tx_hash}")))
        }

        async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>> {
            Ok(DateTime::from_timestamp(1_700_000_000 + block_number as i64, 0).unwrap())
        }

        async fn head_block(&self) -> Result<u64> {
            Ok(self.head)
        }
    }

    fn fill_log(tx_hash: &str, log_index: u64, block: u64, token: u64) -> RawLog {
        let maker: B256 = B256::left_padding_from(&[0x11; 20]);
        let taker: B256 = B256::left_padding_from(&[0x22; 20]);
        let mut data = Vec::with_capacity(6 * 32);
        for word in [
            U256::from(1u64),
            U256::ZERO,               // maker pays collateral: a BUY
            U256::from(token),
            U256::from(550_000u64),   // 0.55 USDC
            U256::from(1_000_000u64), // 1 token
            U256::ZERO,
        ] {
            data.extend_from_slice(&word.to_be_bytes::<32>());
        }
        RawLog {
            address: "0xexchange".to_string(),
            topics: vec![order_filled_topic(), maker, taker],
            data,
            tx_hash: tx_hash.to_string(),
            log_index,
            block_number: block,
        }
    }

    fn garbage_log(tx_hash: &str, log_index: u64, block: u64) -> RawLog {
        let mut log = fill_log(tx_hash, log_index, block, 42);
        log.data.truncate(3 * 32);
        log
    }

    async fn memory_store() -> Store {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        MIGRATOR.run(&pool).await.expect("migrations");
        Store::new(pool)
    }

    fn indexer(store: Store, chain: FakeChain) -> TradeIndexer {
        TradeIndexer::new(store, Arc::new(chain), Vec::new(), "trade_sync".to_string())
    }

    #[tokio::test]
    async fn scanning_twice_inserts_once() {
        let store = memory_store().await;
        let chain = FakeChain::new(
            vec![
                fill_log("0xa", 0, 10, 42),
                fill_log("0xa", 1, 10, 42),
                fill_log("0xb", 0, 12, 42),
            ],
            100,
        );
        let idx = indexer(store.clone(), chain);

        let first = idx.index_range(10, 20, None).await.unwrap();
        assert_eq!(first.inserted, 3);
        assert_eq!(first.decode_skipped, 0);
        assert_eq!(store.sync_state("trade_sync").await.unwrap(), Some(20));

        let second = idx.index_range(10, 20, None).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(store.sync_state("trade_sync").await.unwrap(), Some(20));
    }

    #[tokio::test]
    async fn split_scan_matches_single_scan() {
        let logs = vec![
            fill_log("0xa", 0, 10, 42),
            fill_log("0xb", 0, 15, 42),
            fill_log("0xc", 0, 25, 42),
            fill_log("0xd", 0, 30, 42),
        ];

        let split_store = memory_store().await;
        let idx = indexer(split_store.clone(), FakeChain::new(logs.clone(), 100));
        idx.index_range(10, 20, None).await.unwrap();
        idx.index_range(21, 30, None).await.unwrap();

        let whole_store = memory_store().await;
        let idx2 = indexer(whole_store.clone(), FakeChain::new(logs, 100));
        idx2.index_range(10, 30, None).await.unwrap();

        async fn keys(store: &Store) -> Vec<(String, i64)> {
            let page = store.trades_of_token("42", 100, None).await.unwrap();
            page.items
                .iter()
                .map(|t| (t.tx_hash.clone(), t.log_index))
                .collect()
        }
        assert_eq!(keys(&split_store).await, keys(&whole_store).await);
        assert_eq!(split_store.sync_state("trade_sync").await.unwrap(), Some(30));
    }

    #[tokio::test]
    async fn undecodable_log_skips_but_batch_commits() {
        let store = memory_store().await;
        let chain = FakeChain::new(
            vec![
                fill_log("0xa", 0, 10, 42),
                garbage_log("0xa", 1, 10),
                fill_log("0xb", 0, 11, 42),
                fill_log("0xc", 0, 12, 42),
            ],
            100,
        );
        let idx = indexer(store.clone(), chain);

        let outcome = idx.index_range(10, 20, None).await.unwrap();
        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.decode_skipped, 1);
        assert_eq!(store.sync_state("trade_sync").await.unwrap(), Some(20));
    }

    #[tokio::test]
    async fn rpc_failure_aborts_without_advancing_sync() {
        let store = memory_store().await;
        let mut chain = FakeChain::new(vec![fill_log("0xa", 0, 10, 42)], 100);
        chain.fail_get_logs = true;
        let idx = indexer(store.clone(), chain);

        let err = idx.index_range(10, 20, None).await.unwrap_err();
        assert!(matches!(err, AppError::SourceUnavailable(_)));
        assert_eq!(store.sync_state("trade_sync").await.unwrap(), None);
        assert!(!store.token_has_trades("42").await.unwrap());
    }

    #[tokio::test]
    async fn token_filter_drops_other_markets() {
        let store = memory_store().await;
        let chain = FakeChain::new(
            vec![fill_log("0xa", 0, 10, 42), fill_log("0xb", 0, 11, 77)],
            100,
        );
        let idx = indexer(store.clone(), chain);

        let filter = vec!["42".to_string()];
        let outcome = idx.index_range(10, 20, Some(&filter)).await.unwrap();
        assert_eq!(outcome.inserted, 1);
        assert!(store.token_has_trades("42").await.unwrap());
        assert!(!store.token_has_trades("77").await.unwrap());
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let store = memory_store().await;
        let idx = indexer(store, FakeChain::new(Vec::new(), 100));
        let err = idx.index_range(20, 10, None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRange(_)));
    }

    #[tokio::test]
    async fn trades_are_stored_in_log_order() {
        let store = memory_store().await;
        // Delivered out of order; insertion order must follow (block, log_index).
        let chain = FakeChain::new(
            vec![
                fill_log("0xb", 1, 11, 42),
                fill_log("0xa", 0, 10, 42),
                fill_log("0xb", 0, 11, 42),
            ],
            100,
        );
        let idx = indexer(store.clone(), chain);
        idx.index_range(10, 20, None).await.unwrap();

        let page = store.trades_of_token("42", 10, None).await.unwrap();
        let order: Vec<(i64, i64)> = page
            .items
            .iter()
            .map(|t| (t.block_number, t.log_index))
            .collect();
        assert_eq!(order, vec![(10, 0), (11, 0), (11, 1)]);
    }

    #[tokio::test]
    async fn resume_continues_after_sync_state() {
        let store = memory_store().await;
        let idx = indexer(store.clone(), FakeChain::new(Vec::new(), 100));
        idx.index_range(10, 20, None).await.unwrap();

        let (from, to) = idx.resume_bounds(None, None, None).await.unwrap();
        assert_eq!(from, 21);
        assert_eq!(to, 100);
    }

    #[tokio::test]
    async fn first_run_falls_back_to_near_head() {
        let store = memory_store().await;
        let idx = indexer(store, FakeChain::new(Vec::new(), 100));

        let (from, to) = idx.resume_bounds(None, None, None).await.unwrap();
        assert_eq!(from, 100 - GENESIS_LOOKBACK);
        assert_eq!(to, 100);
    }

    #[tokio::test]
    async fn tx_hash_seeds_both_bounds() {
        let store = memory_store().await;
        let mut chain = FakeChain::new(Vec::new(), 100);
        chain.tx_blocks.insert("0xdead".to_string(), 55);
        let idx = indexer(store, chain);

        let (from, to) = idx.resume_bounds(None, None, Some("0xdead")).await.unwrap();
        assert_eq!((from, to), (55, 55));

        let err = idx.resume_bounds(None, None, Some("0xbeef")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn explicit_from_without_to_scans_one_block() {
        let store = memory_store().await;
        let idx = indexer(store, FakeChain::new(Vec::new(), 100));
        let (from, to) = idx.resume_bounds(Some(42), None, None).await.unwrap();
        assert_eq!((from, to), (42, 42));
    }
}
