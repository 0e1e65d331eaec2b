//! Market discovery: pulls one event and its markets from the metadata
//! source and upserts them. Safe to re-run at any time; rows are visible to
//! the scanner and the query layer as soon as this returns.

use tracing::{info, warn};

use crate::db::store::Store;
use crate::error::{AppError, Result};
use crate::gamma::{normalize_market, MetadataSource};

#[derive(Debug)]
pub struct DiscoveryOutcome {
    pub event_slug: String,
    pub markets_upserted: usize,
    /// Markets rejected as malformed. Logged, never fatal to siblings.
    pub markets_skipped: usize,
}

pub async fn discover(
    store: &Store,
    source: &dyn MetadataSource,
    slug: &str,
) -> Result<DiscoveryOutcome> {
    if slug.trim().is_empty() {
        return Err(AppError::Config("event slug must not be empty".to_string()));
    }

    let (event, raw_markets) = source.event_with_markets(slug).await?;
    store.upsert_event(&event).await?;

    let mut upserted = 0;
    let mut skipped = 0;
    for raw in &raw_markets {
        match normalize_market(raw, &event.slug, event.neg_risk) {
            Ok(market) => {
                store.upsert_market(&market).await?;
                upserted += 1;
            }
            Err(AppError::MalformedMetadata(why)) => {
                warn!("skipping market: {why}");
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        "Discovered event {}: {upserted} markets upserted, {skipped} skipped",
        event.slug
    );
    Ok(DiscoveryOutcome {
        event_slug: event.slug,
        markets_upserted: upserted,
        markets_skipped: skipped,
    })
}
