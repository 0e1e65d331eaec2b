use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health;
use crate::config::DEFAULT_PAGE_LIMIT;
use crate::db::models::{EventRow, MarketRow, TradeRow};
use crate::db::store::{Page, Store};
use crate::error::{AppError, Result};
use crate::types::Outcome;

#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/events/:slug", get(get_event))
        .route("/events/:slug/markets", get(get_event_markets))
        .route("/markets/:slug", get(get_market))
        .route("/markets/:slug/trades", get(get_market_trades))
        .route("/tokens/:token_id/trades", get(get_token_trades))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct TradesQuery {
    pub limit: Option<i64>,
    /// Opaque resumption token: the last seq of the previous page.
    pub cursor: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct EventResponse {
    pub slug: String,
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub neg_risk: bool,
    pub active: bool,
    pub closed: bool,
}

#[derive(Serialize)]
pub struct MarketResponse {
    pub slug: String,
    pub event_slug: String,
    pub title: Option<String>,
    pub condition_id: String,
    pub question_id: Option<String>,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub neg_risk: bool,
    pub status: String,
}

#[derive(Serialize)]
pub struct TradeResponse {
    pub seq: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub timestamp: Option<String>,
    pub token_id: String,
    pub outcome: Outcome,
    pub maker: String,
    pub taker: String,
    pub side: String,
    pub price: String,
    pub size: String,
    pub fee: String,
}

#[derive(Serialize)]
pub struct TradesPage {
    pub trades: Vec<TradeResponse>,
    /// Null on the final page.
    pub next_cursor: Option<i64>,
}

fn event_response(r: EventRow) -> EventResponse {
    EventResponse {
        slug: r.slug,
        id: r.source_id,
        title: r.title,
        description: r.description,
        neg_risk: r.neg_risk != 0,
        active: r.active != 0,
        closed: r.closed != 0,
    }
}

fn market_response(r: MarketRow) -> MarketResponse {
    MarketResponse {
        slug: r.slug,
        event_slug: r.event_slug,
        title: r.title,
        condition_id: r.condition_id,
        question_id: r.question_id,
        yes_token_id: r.yes_token_id,
        no_token_id: r.no_token_id,
        neg_risk: r.neg_risk != 0,
        status: r.status,
    }
}

/// Attribution is a read-time join: compare the trade's token against the
/// market that claims it, if any.
fn trade_response(r: TradeRow, market: Option<&MarketRow>) -> TradeResponse {
    let outcome = match market {
        Some(m) if m.yes_token_id == r.token_id => Outcome::Yes,
        Some(m) if m.no_token_id == r.token_id => Outcome::No,
        _ => Outcome::Unknown,
    };
    TradeResponse {
        seq: r.seq,
        tx_hash: r.tx_hash,
        log_index: r.log_index,
        block_number: r.block_number,
        timestamp: r.timestamp,
        token_id: r.token_id,
        outcome,
        maker: r.maker,
        taker: r.taker,
        side: r.side,
        price: r.price,
        size: r.size,
        fee: r.fee,
    }
}

fn trades_page(page: Page<TradeRow>, market: Option<&MarketRow>) -> TradesPage {
    TradesPage {
        trades: page
            .items
            .into_iter()
            .map(|r| trade_response(r, market))
            .collect(),
        next_cursor: page.next_cursor,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_event(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
) -> Result<Json<EventResponse>> {
    let row = state
        .store
        .event_by_slug(&slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event {slug}")))?;
    Ok(Json(event_response(row)))
}

/// An unknown event is a 404; a known event with no markets yet is an empty
/// list.
async fn get_event_markets(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<MarketResponse>>> {
    if state.store.event_by_slug(&slug).await?.is_none() {
        return Err(AppError::NotFound(format!("event {slug}")));
    }
    let rows = state.store.markets_of_event(&slug).await?;
    Ok(Json(rows.into_iter().map(market_response).collect()))
}

async fn get_market(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
) -> Result<Json<MarketResponse>> {
    let row = state
        .store
        .market_by_slug(&slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("market {slug}")))?;
    Ok(Json(market_response(row)))
}

async fn get_market_trades(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
    Query(params): Query<TradesQuery>,
) -> Result<Json<TradesPage>> {
    let market = state
        .store
        .market_by_slug(&slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("market {slug}")))?;
    let page = state
        .store
        .trades_of_market(&market, params.limit.unwrap_or(DEFAULT_PAGE_LIMIT), params.cursor)
        .await?;
    Ok(Json(trades_page(page, Some(&market))))
}

/// A token is known if a market claims it or any trade references it;
/// anything else is a 404, distinct from an empty-but-valid page.
async fn get_token_trades(
    State(state): State<ApiState>,
    Path(token_id): Path<String>,
    Query(params): Query<TradesQuery>,
) -> Result<Json<TradesPage>> {
    let market = state.store.market_by_token(&token_id).await?;
    if market.is_none() && !state.store.token_has_trades(&token_id).await? {
        return Err(AppError::NotFound(format!("token {token_id}")));
    }
    let page = state
        .store
        .trades_of_token(&token_id, params.limit.unwrap_or(DEFAULT_PAGE_LIMIT), params.cursor)
        .await?;
    Ok(Json(trades_page(page, market.as_ref())))
}
