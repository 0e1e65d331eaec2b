//! Gamma metadata client: fetches event/market records from the Polymarket
//! Gamma REST API and normalizes the loosely-typed payloads into domain types.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::types::{normalize_token_id, EventMeta, MarketMeta};

/// External boundary for market metadata. Everything the indexing core needs
/// from Gamma: one event by slug plus its raw market payloads. Markets are
/// returned unnormalized so discovery can skip malformed entries one by one.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn event_with_markets(&self, slug: &str) -> Result<(EventMeta, Vec<Value>)>;
}

pub struct GammaClient {
    client: reqwest::Client,
    base: String,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl GammaClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base: cfg.gamma_api_url.trim_end_matches('/').to_string(),
            max_retries: cfg.max_retries.max(1),
            retry_base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
        })
    }

    /// GET a JSON document with exponential backoff on transient failures.
    /// 404 maps to `NotFound` immediately; other 4xx are not retried.
    async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        let mut last_err = String::new();

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = self.retry_base_delay * 2u32.pow(attempt - 1);
                debug!("gamma retry {attempt} for {path} in {delay:?}");
                tokio::time::sleep(delay).await;
            }

            let sent = self.client.get(&url).query(params).send().await;
            match sent {
                Ok(resp) => {
                    let status = resp.status();
                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(AppError::NotFound(format!("gamma {path}")));
                    }
                    if status.is_client_error() {
                        return Err(AppError::SourceUnavailable(format!(
                            "gamma {path}: HTTP {status}"
                        )));
                    }
                    if status.is_server_error() {
                        last_err = format!("HTTP {status}");
                        continue;
                    }
                    match resp.json::<Value>().await {
                        Ok(v) => return Ok(v),
                        Err(e) => {
                            last_err = e.to_string();
                            continue;
                        }
                    }
                }
                Err(e) => {
                    last_err = e.to_string();
                    continue;
                }
            }
        }

        Err(AppError::SourceUnavailable(format!("gamma {path}: {last_err}")))
    }
}

#[async_trait]
impl MetadataSource for GammaClient {
    async fn event_with_markets(&self, slug: &str) -> Result<(EventMeta, Vec<Value>)> {
        // Preferred endpoint, then the query-param fallback.
        let event_obj = match self.get_json(&format!("/events/{slug}"), &[]).await {
            Ok(v) if v.is_object() => v,
            Ok(_) | Err(AppError::NotFound(_)) => {
                let listed = self
                    .get_json("/events", &[("slug", slug), ("limit", "1")])
                    .await?;
                first_object(listed, &["data", "events"])
                    .ok_or_else(|| AppError::NotFound(format!("event {slug}")))?
            }
            Err(e) => return Err(e),
        };

        let mut markets: Vec<Value> = event_obj
            .get("markets")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();

        // Some events come back without embedded markets; the global markets
        // endpoint is the fallback.
        if markets.is_empty() {
            let listed = self
                .get_json("/markets", &[("eventSlug", slug), ("limit", "500")])
                .await
                .unwrap_or(Value::Null);
            markets = if let Some(items) = listed.as_array() {
                items.clone()
            } else {
                ["data", "markets"]
                    .iter()
                    .find_map(|k| listed.get(k).and_then(|v| v.as_array()).cloned())
                    .unwrap_or_default()
            };
        }

        markets.retain(|m| m.is_object());
        Ok((normalize_event(&event_obj, slug), markets))
    }
}

/// Unwrap a list response that may be a bare array or an object with one of
/// the given list keys, and take the first entry.
fn first_object(v: Value, keys: &[&str]) -> Option<Value> {
    if let Some(items) = v.as_array() {
        return items.first().cloned();
    }
    keys.iter()
        .find_map(|k| v.get(k).and_then(|l| l.as_array()).and_then(|l| l.first()).cloned())
}

// ---------------------------------------------------------------------------
// Payload normalization
// ---------------------------------------------------------------------------

/// First present-and-non-null value among camelCase/snake_case key variants.
fn extract<'a>(v: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| v.get(k).filter(|x| !x.is_null()))
}

fn extract_str(v: &Value, keys: &[&str]) -> Option<String> {
    extract(v, keys).map(|x| match x {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn extract_bool(v: &Value, keys: &[&str], default: bool) -> bool {
    extract(v, keys).and_then(|x| x.as_bool()).unwrap_or(default)
}

pub fn normalize_event(event: &Value, fallback_slug: &str) -> EventMeta {
    let slug = extract_str(event, &["slug"])
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback_slug.to_string());
    EventMeta {
        source_id: extract_str(event, &["id", "eventId"]),
        slug,
        title: extract_str(event, &["title", "question", "name"]),
        description: extract_str(event, &["description"]),
        neg_risk: extract_bool(event, &["negRisk", "enableNegRisk", "neg_risk"], false),
        active: extract_bool(event, &["active"], true),
        closed: extract_bool(event, &["closed"], false),
        created_at: extract_str(event, &["createdAt", "created_at"]),
    }
}

/// Normalize one raw Gamma market. A market missing its slug, condition id or
/// either outcome token id violates the market invariant and is rejected as
/// `MalformedMetadata`.
pub fn normalize_market(
    market: &Value,
    event_slug: &str,
    event_neg_risk: bool,
) -> Result<MarketMeta> {
    let slug = extract_str(market, &["slug", "marketSlug"])
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::MalformedMetadata(format!("market under {event_slug}: no slug")))?;
    let condition_id = extract_str(market, &["conditionId", "condition_id"])
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::MalformedMetadata(format!("market {slug}: no condition id")))?;

    let outcomes = parse_string_list(extract(market, &["outcomes"]));
    let token_ids = parse_token_ids(extract(market, &["clobTokenIds", "clob_token_ids"]));

    let yes_idx = outcomes
        .iter()
        .position(|o| o.eq_ignore_ascii_case("Yes") || o.eq_ignore_ascii_case("Up"));
    let no_idx = outcomes
        .iter()
        .position(|o| o.eq_ignore_ascii_case("No") || o.eq_ignore_ascii_case("Down"));

    let (yes_idx, no_idx) = match (yes_idx, no_idx) {
        (Some(y), Some(n)) => (y, n),
        // Binary market with unrecognized labels: positional fallback.
        _ if token_ids.len() >= 2 => (0, 1),
        _ => {
            return Err(AppError::MalformedMetadata(format!(
                "market {slug}: cannot map outcome tokens"
            )))
        }
    };

    let yes_token_id = token_ids
        .get(yes_idx)
        .cloned()
        .ok_or_else(|| AppError::MalformedMetadata(format!("market {slug}: no yes token")))?;
    let no_token_id = token_ids
        .get(no_idx)
        .cloned()
        .ok_or_else(|| AppError::MalformedMetadata(format!("market {slug}: no no token")))?;
    if yes_token_id == no_token_id {
        return Err(AppError::MalformedMetadata(format!(
            "market {slug}: outcome tokens are not distinct"
        )));
    }

    Ok(MarketMeta {
        event_slug: event_slug.to_string(),
        slug,
        title: extract_str(market, &["question", "title", "name"]),
        condition_id,
        question_id: extract_str(market, &["questionId", "question_id"]),
        yes_token_id,
        no_token_id,
        neg_risk: extract_bool(
            market,
            &["enableNegRisk", "negRisk", "enable_neg_risk"],
            event_neg_risk,
        ),
        status: detect_status(market),
        created_at: extract_str(market, &["createdAt", "created_at"]),
    })
}

/// Gamma encodes list fields either as JSON arrays or as JSON-encoded strings
/// (`"[\"Yes\", \"No\"]"`).
fn parse_string_list(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|x| x.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => serde_json::from_str::<Vec<String>>(s).unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn parse_token_ids(raw: Option<&Value>) -> Vec<String> {
    parse_string_list(raw)
        .iter()
        .filter_map(|s| normalize_token_id(s))
        .collect()
}

fn detect_status(market: &Value) -> String {
    if let Some(status) = extract_str(market, &["status", "state"]).filter(|s| !s.is_empty()) {
        return status;
    }
    if extract_bool(market, &["closed"], false) {
        return "closed".to_string();
    }
    if extract_bool(market, &["active"], true) {
        return "active".to_string();
    }
    "unknown".to_string()
}
