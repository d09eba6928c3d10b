// src/api.rs
// HTTP adapter over MarketService. Identity is caller-supplied; authentication
// lives in the outer stack.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::errors::EngineError;
use crate::market::MarketService;
use crate::rooms::PrizeSlot;
use crate::types::{OrderKind, TradeStatus};

type AppState = Arc<MarketService>;

pub fn router(market: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/price", get(current_price))
        .route("/api/candles", get(historical_candles))
        .route("/api/candles/current", get(current_candle))
        .route("/api/rooms", post(create_room).get(list_rooms))
        .route("/api/rooms/:id", get(room_detail))
        .route("/api/rooms/:id/join", post(join_room))
        .route("/api/rooms/:id/ranking", get(room_ranking))
        .route("/api/trades", post(place_order).get(user_trades))
        .route("/api/trades/active", get(active_trades))
        .route("/api/trades/:id/close", put(close_trade))
        .route("/api/trades/:id/stoploss", put(set_stop_loss))
        .route("/api/trades/:id/takeprofit", put(set_take_profit))
        .layer(cors)
        .with_state(market)
}

async fn health_check(State(market): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "market_open": market.scheduler.market_open(),
        "active_rooms": market.scheduler.active_room_ids(),
        "price": market.current_price(),
        "stored_candles": market.candles.len(),
        "timestamp": chrono::Utc::now(),
    }))
}

async fn current_price(State(market): State<AppState>) -> Json<Value> {
    Json(json!({
        "price": market.current_price(),
        "server_time": crate::types::now_millis(),
    }))
}

#[derive(Debug, Deserialize)]
struct CandleQuery {
    timeframe: u32,
    limit: Option<usize>,
}

async fn historical_candles(
    State(market): State<AppState>,
    Query(query): Query<CandleQuery>,
) -> Result<Json<Value>, EngineError> {
    let limit = query.limit.unwrap_or(200);
    let candles = market.historical_candles(query.timeframe, limit)?;
    Ok(Json(json!({
        "success": true,
        "count": candles.len(),
        "data": candles,
    })))
}

async fn current_candle(State(market): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": market.current_candle(),
    }))
}

#[derive(Debug, Deserialize)]
struct CreateRoomRequest {
    name: String,
    entry_fee: f64,
    capacity: Option<usize>,
    competition_date: NaiveDate,
    start_time: Option<String>,
    end_time: Option<String>,
    prize_distribution: Option<Vec<PrizeSlot>>,
}

async fn create_room(
    State(market): State<AppState>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<Json<Value>, EngineError> {
    let summary = market.create_room(
        request.name,
        request.entry_fee,
        request.capacity,
        request.competition_date,
        request.start_time.unwrap_or_else(|| "08:00".to_string()),
        request.end_time.unwrap_or_else(|| "17:00".to_string()),
        request.prize_distribution,
    )?;
    Ok(Json(json!({ "success": true, "data": summary })))
}

async fn list_rooms(State(market): State<AppState>) -> Json<Value> {
    let rooms = market.list_rooms();
    Json(json!({ "success": true, "count": rooms.len(), "data": rooms }))
}

async fn room_detail(
    State(market): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<Value>, EngineError> {
    let room = market.room_detail(&room_id)?;
    Ok(Json(json!({ "success": true, "data": room })))
}

#[derive(Debug, Deserialize)]
struct JoinRoomRequest {
    user_id: String,
    username: String,
    balance: f64,
}

async fn join_room(
    State(market): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<JoinRoomRequest>,
) -> Result<Json<Value>, EngineError> {
    let summary = market.join_room(&room_id, &request.user_id, &request.username, request.balance)?;
    Ok(Json(json!({ "success": true, "data": summary })))
}

async fn room_ranking(
    State(market): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<Value>, EngineError> {
    let ranking = market.room_ranking(&room_id)?;
    Ok(Json(json!({ "success": true, "data": ranking })))
}

#[derive(Debug, Deserialize)]
struct PlaceOrderRequest {
    user_id: String,
    username: String,
    room_id: String,
    #[serde(rename = "type")]
    kind: OrderKind,
    size: Option<f64>,
}

async fn place_order(
    State(market): State<AppState>,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<Json<Value>, EngineError> {
    let outcome = market.place_order(
        &request.user_id,
        &request.username,
        &request.room_id,
        request.kind,
        request.size.unwrap_or(1.0),
    )?;
    Ok(Json(json!({ "success": true, "data": outcome })))
}

#[derive(Debug, Deserialize)]
struct UserTradesQuery {
    user_id: String,
    room_id: Option<String>,
    status: Option<TradeStatus>,
}

async fn user_trades(
    State(market): State<AppState>,
    Query(query): Query<UserTradesQuery>,
) -> Json<Value> {
    let trades = market.user_trades(&query.user_id, query.room_id.as_deref(), query.status);
    Json(json!({ "success": true, "count": trades.len(), "data": trades }))
}

#[derive(Debug, Deserialize)]
struct ActiveTradesQuery {
    user_id: String,
    username: Option<String>,
    room_id: String,
}

async fn active_trades(
    State(market): State<AppState>,
    Query(query): Query<ActiveTradesQuery>,
) -> Result<Json<Value>, EngineError> {
    let username = query.username.clone().unwrap_or_else(|| query.user_id.clone());
    let (trades, user_position) = market.active_trades(&query.user_id, &username, &query.room_id)?;
    Ok(Json(json!({
        "success": true,
        "count": trades.len(),
        "data": {
            "trades": trades,
            "user_position": user_position,
        },
    })))
}

#[derive(Debug, Deserialize)]
struct CloseTradeRequest {
    user_id: String,
}

async fn close_trade(
    State(market): State<AppState>,
    Path(trade_id): Path<String>,
    Json(request): Json<CloseTradeRequest>,
) -> Result<Json<Value>, EngineError> {
    let (trade, current_capital) = market.close_trade(&trade_id, &request.user_id)?;
    Ok(Json(json!({
        "success": true,
        "data": {
            "trade": trade,
            "current_capital": current_capital,
        },
    })))
}

#[derive(Debug, Deserialize)]
struct StopLossRequest {
    user_id: String,
    stop_loss: f64,
}

async fn set_stop_loss(
    State(market): State<AppState>,
    Path(trade_id): Path<String>,
    Json(request): Json<StopLossRequest>,
) -> Result<Json<Value>, EngineError> {
    let trade = market.set_stop_loss(&trade_id, &request.user_id, request.stop_loss)?;
    Ok(Json(json!({ "success": true, "data": trade })))
}

#[derive(Debug, Deserialize)]
struct TakeProfitRequest {
    user_id: String,
    take_profit: f64,
}

async fn set_take_profit(
    State(market): State<AppState>,
    Path(trade_id): Path<String>,
    Json(request): Json<TakeProfitRequest>,
) -> Result<Json<Value>, EngineError> {
    let trade = market.set_take_profit(&trade_id, &request.user_id, request.take_profit)?;
    Ok(Json(json!({ "success": true, "data": trade })))
}
