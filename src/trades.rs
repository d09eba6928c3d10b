// src/trades.rs
// Standalone trade records and the in-memory trade store.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{CandleSnapshot, ClosedBy, TradeSide, TradeStatus};

/// Directional profit: longs gain when price rises, shorts when it falls.
pub fn pnl(side: TradeSide, entry_price: f64, exit_price: f64, size: f64) -> f64 {
    match side {
        TradeSide::Long => (exit_price - entry_price) * size,
        TradeSide::Short => (entry_price - exit_price) * size,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub user_id: String,
    pub room_id: String,
    pub side: TradeSide,
    pub status: TradeStatus,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub size: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub profit: Option<f64>,
    pub entry_time: i64,
    pub exit_time: Option<i64>,
    pub closed_by: Option<ClosedBy>,
    pub entry_candle: CandleSnapshot,
    pub exit_candle: Option<CandleSnapshot>,
}

impl Trade {
    pub fn open(
        user_id: &str,
        room_id: &str,
        side: TradeSide,
        entry_price: f64,
        size: f64,
        entry_time: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            room_id: room_id.to_string(),
            side,
            status: TradeStatus::Open,
            entry_price,
            exit_price: None,
            size,
            stop_loss: None,
            take_profit: None,
            profit: None,
            entry_time,
            exit_time: None,
            closed_by: None,
            entry_candle: CandleSnapshot::flat(entry_price, entry_time),
            exit_candle: None,
        }
    }

    /// Mark-to-market PnL: realized profit once closed, otherwise valued at
    /// `current_price`.
    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        if self.status == TradeStatus::Closed {
            return self.profit.unwrap_or(0.0);
        }
        pnl(self.side, self.entry_price, current_price, self.size)
    }

    /// Which protective level, if any, fires at `price`. Stop-loss wins when
    /// both would fire on the same tick.
    pub fn trigger_hit(&self, price: f64) -> Option<ClosedBy> {
        if self.status != TradeStatus::Open {
            return None;
        }

        match self.side {
            TradeSide::Long => {
                if let Some(stop_loss) = self.stop_loss {
                    if price <= stop_loss {
                        return Some(ClosedBy::StopLoss);
                    }
                }
                if let Some(take_profit) = self.take_profit {
                    if price >= take_profit {
                        return Some(ClosedBy::TakeProfit);
                    }
                }
            }
            TradeSide::Short => {
                if let Some(stop_loss) = self.stop_loss {
                    if price >= stop_loss {
                        return Some(ClosedBy::StopLoss);
                    }
                }
                if let Some(take_profit) = self.take_profit {
                    if price <= take_profit {
                        return Some(ClosedBy::TakeProfit);
                    }
                }
            }
        }

        None
    }
}

pub struct TradeStore {
    trades: DashMap<String, Trade>,
}

impl TradeStore {
    pub fn new() -> Self {
        Self { trades: DashMap::new() }
    }

    pub fn insert(&self, trade: Trade) {
        self.trades.insert(trade.id.clone(), trade);
    }

    pub fn get(&self, trade_id: &str) -> Option<Trade> {
        self.trades.get(trade_id).map(|entry| entry.value().clone())
    }

    /// Run `mutate` against the stored trade, if present.
    pub fn with_mut<R>(&self, trade_id: &str, mutate: impl FnOnce(&mut Trade) -> R) -> Option<R> {
        self.trades.get_mut(trade_id).map(|mut entry| mutate(entry.value_mut()))
    }

    pub fn open_trades(&self) -> Vec<Trade> {
        self.trades
            .iter()
            .filter(|entry| entry.value().status == TradeStatus::Open)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn open_trades_for_user(&self, user_id: &str, room_id: &str) -> Vec<Trade> {
        self.trades
            .iter()
            .filter(|entry| {
                let trade = entry.value();
                trade.status == TradeStatus::Open
                    && trade.user_id == user_id
                    && trade.room_id == room_id
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn open_trades_for_room(&self, room_id: &str) -> Vec<Trade> {
        self.trades
            .iter()
            .filter(|entry| {
                let trade = entry.value();
                trade.status == TradeStatus::Open && trade.room_id == room_id
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// A user's trade history, optionally filtered, newest-first by entry time.
    pub fn user_trades(
        &self,
        user_id: &str,
        room_id: Option<&str>,
        status: Option<TradeStatus>,
    ) -> Vec<Trade> {
        let mut trades: Vec<Trade> = self
            .trades
            .iter()
            .filter(|entry| {
                let trade = entry.value();
                trade.user_id == user_id
                    && room_id.map_or(true, |r| trade.room_id == r)
                    && status.map_or(true, |s| trade.status == s)
            })
            .map(|entry| entry.value().clone())
            .collect();
        trades.sort_by(|a, b| b.entry_time.cmp(&a.entry_time));
        trades
    }
}

impl Default for TradeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_and_short_pnl_mirror() {
        assert_eq!(pnl(TradeSide::Long, 100.0, 110.0, 2.0), 20.0);
        assert_eq!(pnl(TradeSide::Short, 100.0, 90.0, 2.0), 20.0);
        assert_eq!(pnl(TradeSide::Long, 100.0, 90.0, 2.0), -20.0);
        assert_eq!(pnl(TradeSide::Short, 100.0, 110.0, 2.0), -20.0);
    }

    #[test]
    fn long_triggers() {
        let mut trade = Trade::open("u1", "r1", TradeSide::Long, 100.0, 1.0, 1);
        trade.stop_loss = Some(95.0);
        trade.take_profit = Some(110.0);

        assert_eq!(trade.trigger_hit(96.0), None);
        assert_eq!(trade.trigger_hit(95.0), Some(ClosedBy::StopLoss));
        assert_eq!(trade.trigger_hit(110.0), Some(ClosedBy::TakeProfit));
    }

    #[test]
    fn short_triggers_are_mirrored() {
        let mut trade = Trade::open("u1", "r1", TradeSide::Short, 100.0, 1.0, 1);
        trade.stop_loss = Some(105.0);
        trade.take_profit = Some(90.0);

        assert_eq!(trade.trigger_hit(104.0), None);
        assert_eq!(trade.trigger_hit(105.0), Some(ClosedBy::StopLoss));
        assert_eq!(trade.trigger_hit(90.0), Some(ClosedBy::TakeProfit));
    }

    #[test]
    fn stop_loss_wins_when_both_would_fire() {
        let mut trade = Trade::open("u1", "r1", TradeSide::Long, 100.0, 1.0, 1);
        // Overlapping levels should not happen, but if they do the stop rules.
        trade.stop_loss = Some(100.0);
        trade.take_profit = Some(100.0);
        assert_eq!(trade.trigger_hit(100.0), Some(ClosedBy::StopLoss));
    }

    #[test]
    fn user_trades_newest_first() {
        let store = TradeStore::new();
        for i in 0..3 {
            store.insert(Trade::open("u1", "r1", TradeSide::Long, 100.0, 1.0, i));
        }
        store.insert(Trade::open("u2", "r1", TradeSide::Long, 100.0, 1.0, 99));

        let trades = store.user_trades("u1", Some("r1"), None);
        assert_eq!(trades.len(), 3);
        assert_eq!(trades[0].entry_time, 2);
        assert_eq!(trades[2].entry_time, 0);
    }
}
