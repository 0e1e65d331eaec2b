use std::sync::Arc;

use alloy::primitives::Address;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use polymarket_indexer::chain::RpcLogSource;
use polymarket_indexer::config::Config;
use polymarket_indexer::db;
use polymarket_indexer::db::store::Store;
use polymarket_indexer::error::{AppError, Result};
use polymarket_indexer::gamma::GammaClient;
use polymarket_indexer::indexer::{discover, TradeIndexer};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Indexing failed ({}): {e}", e.kind());
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let pool = db::connect(&cfg.db_path).await?;
    let store = Store::new(pool);
    info!("Database ready at {}", cfg.db_path);

    // Discovery first: market rows carry the token ids that attribute trades.
    if let Some(slug) = &cfg.event_slug {
        let gamma = GammaClient::new(&cfg)?;
        let outcome = discover(&store, &gamma, slug).await?;
        info!(
            "Event {}: {} markets upserted, {} skipped",
            outcome.event_slug, outcome.markets_upserted, outcome.markets_skipped
        );
    }

    let addresses = cfg
        .exchange_addresses
        .iter()
        .map(|a| {
            a.parse::<Address>()
                .map_err(|_| AppError::Config(format!("invalid exchange address: {a}")))
        })
        .collect::<Result<Vec<_>>>()?;
    if addresses.is_empty() {
        return Err(AppError::Config(
            "at least one exchange address must be configured".to_string(),
        ));
    }

    let logs = Arc::new(RpcLogSource::connect(&cfg)?);
    let indexer = TradeIndexer::new(store, logs, addresses, cfg.sync_key.clone());

    let (from_block, to_block) = indexer
        .resume_bounds(cfg.from_block, cfg.to_block, cfg.tx_hash.as_deref())
        .await?;
    let filter = if cfg.filter_tokens.is_empty() {
        None
    } else {
        Some(cfg.filter_tokens.as_slice())
    };

    let outcome = indexer.index_range(from_block, to_block, filter).await?;
    info!(
        "Scan complete: blocks [{}, {}], {} new trades, {} undecodable logs",
        outcome.from_block, outcome.to_block, outcome.inserted, outcome.decode_skipped
    );
    Ok(())
}
