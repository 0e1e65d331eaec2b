//! Chain log client: the RPC boundary for the scanner.
//!
//! `LogSource` is everything the indexing core needs from the chain; the
//! alloy-backed `RpcLogSource` is the production implementation. alloy 0.9's
//! `ProviderBuilder::new().on_http()` returns a deeply-nested filler type,
//! so the provider is stored type-erased as `Arc<dyn Provider>`.

use std::sync::Arc;
use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{BlockTransactionsKind, Filter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::config::Config;
use crate::error::{AppError, Result};

/// Raw log as the decoder consumes it, detached from any RPC library types
/// beyond the primitive hashes.
#[derive(Debug, Clone)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
}

/// External boundary for chain access.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Fetch logs for `topic0` emitted by `addresses` over `[from, to]`,
    /// both bounds inclusive.
    async fn get_logs(
        &self,
        addresses: &[Address],
        topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>>;

    /// Resolve a transaction hash to the block that mined it.
    async fn block_of(&self, tx_hash: &str) -> Result<u64>;

    /// Timestamp of a block.
    async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>>;

    /// Current chain head.
    async fn head_block(&self) -> Result<u64>;
}

pub struct RpcLogSource {
    provider: Arc<dyn Provider + Send + Sync>,
    chunk_size: u64,
    timeout: Duration,
    /// Fill bursts share blocks; one timestamp lookup per block is enough.
    timestamp_cache: DashMap<u64, DateTime<Utc>>,
}

impl RpcLogSource {
    pub fn connect(cfg: &Config) -> Result<Self> {
        let url = cfg
            .rpc_url
            .parse()
            .map_err(|_| AppError::Config(format!("invalid RPC_URL: {}", cfg.rpc_url)))?;
        let provider = ProviderBuilder::new().on_http(url).boxed();
        Ok(Self {
            provider: Arc::new(provider),
            chunk_size: cfg.log_chunk_size.max(1),
            timeout: Duration::from_secs(cfg.request_timeout_secs),
            timestamp_cache: DashMap::new(),
        })
    }

    /// Run an RPC future under the configured timeout. Expiry aborts the
    /// call before anything is committed, so a retry is always safe.
    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, alloy::transports::TransportError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(map_transport_err(what, &e)),
            Err(_) => Err(AppError::SourceUnavailable(format!(
                "{what}: timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

fn map_transport_err(what: &str, e: &alloy::transports::TransportError) -> AppError {
    let text = e.to_string();
    let lowered = text.to_lowercase();
    if lowered.contains("range") || lowered.contains("too many") || lowered.contains("limit") {
        AppError::RangeTooLarge(format!("{what}: {text}"))
    } else {
        AppError::SourceUnavailable(format!("{what}: {text}"))
    }
}

#[async_trait]
impl LogSource for RpcLogSource {
    async fn get_logs(
        &self,
        addresses: &[Address],
        topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>> {
        let mut out = Vec::new();
        let mut cursor = from_block;

        while cursor <= to_block {
            let end = cursor.saturating_add(self.chunk_size - 1).min(to_block);
            let filter = Filter::new()
                .address(addresses.to_vec())
                .event_signature(topic0)
                .from_block(cursor)
                .to_block(end);

            let what = format!("eth_getLogs [{cursor}, {end}]");
            let logs = self.bounded(&what, self.provider.get_logs(&filter)).await?;
            debug!("{} logs in blocks [{cursor}, {end}]", logs.len());

            for log in logs {
                // Pending logs lack position info and cannot be keyed.
                let (Some(tx_hash), Some(log_index), Some(block_number)) =
                    (log.transaction_hash, log.log_index, log.block_number)
                else {
                    continue;
                };
                out.push(RawLog {
                    address: format!("{:#x}", log.inner.address),
                    topics: log.inner.data.topics().to_vec(),
                    data: log.inner.data.data.to_vec(),
                    tx_hash: format!("{tx_hash:#x}"),
                    log_index,
                    block_number,
                });
            }
            cursor = end + 1;
        }

        Ok(out)
    }

    async fn block_of(&self, tx_hash: &str) -> Result<u64> {
        let hash: B256 = tx_hash
            .parse()
            .map_err(|_| AppError::Config(format!("invalid transaction hash: {tx_hash}")))?;
        let receipt = self
            .bounded("eth_getTransactionReceipt", self.provider.get_transaction_receipt(hash))
            .await?;
        receipt
            .and_then(|r| r.block_number)
            .ok_or_else(|| AppError::NotFound(format!("transaction {tx_hash}")))
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>> {
        if let Some(ts) = self.timestamp_cache.get(&block_number) {
            return Ok(*ts);
        }
        let block = self
            .bounded(
                "eth_getBlockByNumber",
                self.provider.get_block_by_number(
                    BlockNumberOrTag::Number(block_number),
                    BlockTransactionsKind::Hashes,
                ),
            )
            .await?
            .ok_or_else(|| AppError::NotFound(format!("block {block_number}")))?;

        let ts = DateTime::<Utc>::from_timestamp(block.header.timestamp as i64, 0)
            .ok_or_else(|| AppError::Decode(format!("block {block_number}: bad timestamp")))?;
        self.timestamp_cache.insert(block_number, ts);
        Ok(ts)
    }

    async fn head_block(&self) -> Result<u64> {
        self.bounded("eth_blockNumber", self.provider.get_block_number())
            .await
    }
}
