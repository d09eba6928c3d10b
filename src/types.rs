// src/types.rs
use serde::{Deserialize, Serialize};

/// OHLCV summary over a fixed time bucket. Timeframe-1 candles are the base
/// unit; higher timeframes are aggregated from consecutive groups of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timeframe: u32,
}

/// Flat price snapshot attached to a trade at entry and exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleSnapshot {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl CandleSnapshot {
    pub fn flat(price: f64, timestamp: i64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Long,
    Short,
}

/// What a client can submit: open a side, or flatten everything in the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    Long,
    Short,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Open,
    Closed,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClosedBy {
    User,
    StopLoss,
    TakeProfit,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomStatus {
    Pending,
    Active,
    Closing,
    Closed,
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
