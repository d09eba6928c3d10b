// src/ledger.rs
// Trade engine: opens/closes positions, keeps Trade records and their
// mirrored Positions in lock-step, and evaluates protective triggers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::EngineError;
use crate::generator::PriceGenerator;
use crate::rooms::{Room, RoomRegistry};
use crate::trade_log::TradeCsvLog;
use crate::trades::{pnl, Trade, TradeStore};
use crate::types::{
    now_millis, CandleSnapshot, ClosedBy, PositionStatus, RoomStatus, TradeSide, TradeStatus,
};

/// Result of a flatten-everything order: how many trades went, at what total
/// profit, and where the capital landed.
#[derive(Debug, Clone, Serialize)]
pub struct CloseSummary {
    pub closed: usize,
    pub profit: f64,
    pub current_capital: f64,
}

pub struct TradeLedger {
    rooms: Arc<RoomRegistry>,
    trades: Arc<TradeStore>,
    generator: Arc<Mutex<PriceGenerator>>,
    trade_log: Arc<TradeCsvLog>,
}

impl TradeLedger {
    pub fn new(
        rooms: Arc<RoomRegistry>,
        trades: Arc<TradeStore>,
        generator: Arc<Mutex<PriceGenerator>>,
        trade_log: Arc<TradeCsvLog>,
    ) -> Self {
        Self {
            rooms,
            trades,
            generator,
            trade_log,
        }
    }

    pub fn current_price(&self) -> f64 {
        self.generator.lock().last_price
    }

    /// Open a LONG/SHORT position at the current price. The room must be
    /// ACTIVE; unknown users are enrolled on the fly.
    pub fn open_position(
        &self,
        user_id: &str,
        username: &str,
        room_id: &str,
        side: TradeSide,
        size: f64,
    ) -> Result<Trade, EngineError> {
        if !size.is_finite() || size <= 0.0 {
            return Err(EngineError::Validation("size must be positive".to_string()));
        }

        let room_handle = self.rooms.get(room_id).ok_or(EngineError::RoomNotFound)?;
        let entry_price = self.current_price();

        let mut room = room_handle.lock();
        if room.status != RoomStatus::Active {
            return Err(EngineError::RoomNotActive);
        }

        let entry_time = now_millis();
        let trade = Trade::open(user_id, room_id, side, entry_price, size, entry_time);

        let participant = room.ensure_participant(user_id, username);
        participant.open_positions.push(crate::rooms::Position {
            side,
            entry_price,
            size,
            stop_loss: None,
            take_profit: None,
            timestamp: entry_time,
            status: PositionStatus::Open,
            close_price: None,
            closed_at: None,
            pnl: 0.0,
        });

        self.trades.insert(trade.clone());

        info!(
            "📈 [LEDGER] Opened {:?} trade {} for user {} in room {} at {}",
            side, trade.id, user_id, room_id, entry_price
        );

        Ok(trade)
    }

    /// Close one trade on the owner's request at the current price.
    pub fn close_trade(
        &self,
        trade_id: &str,
        user_id: &str,
    ) -> Result<(Trade, f64), EngineError> {
        let trade = self.trades.get(trade_id).ok_or(EngineError::TradeNotFound)?;
        if trade.user_id != user_id {
            return Err(EngineError::Forbidden);
        }
        if trade.status != TradeStatus::Open {
            return Err(EngineError::AlreadyClosed);
        }

        let room_handle = self
            .rooms
            .get(&trade.room_id)
            .ok_or(EngineError::RoomNotFound)?;
        let exit_price = self.current_price();

        let mut room = room_handle.lock();
        self.finalize_close(&mut room, trade_id, exit_price, ClosedBy::User)
    }

    /// Close every open trade the user holds in the room, returning the
    /// aggregate result. Requires an ACTIVE room, like opening does.
    pub fn close_all_for_user(
        &self,
        user_id: &str,
        username: &str,
        room_id: &str,
    ) -> Result<CloseSummary, EngineError> {
        let room_handle = self.rooms.get(room_id).ok_or(EngineError::RoomNotFound)?;
        let exit_price = self.current_price();

        let mut room = room_handle.lock();
        if room.status != RoomStatus::Active {
            return Err(EngineError::RoomNotActive);
        }
        room.ensure_participant(user_id, username);

        let open_trades = self.trades.open_trades_for_user(user_id, room_id);
        let mut total_profit = 0.0;
        let mut closed = 0;
        let mut current_capital = room.participant(user_id).map(|p| p.current_capital).unwrap_or(0.0);

        for trade in open_trades {
            match self.finalize_close(&mut room, &trade.id, exit_price, ClosedBy::User) {
                Ok((closed_trade, capital)) => {
                    total_profit += closed_trade.profit.unwrap_or(0.0);
                    current_capital = capital;
                    closed += 1;
                }
                Err(EngineError::AlreadyClosed) => {}
                Err(e) => return Err(e),
            }
        }

        info!(
            "📉 [LEDGER] Flattened {} trades for user {} in room {} (profit {})",
            closed, user_id, room_id, total_profit
        );

        Ok(CloseSummary {
            closed,
            profit: total_profit,
            current_capital,
        })
    }

    pub fn set_stop_loss(
        &self,
        trade_id: &str,
        user_id: &str,
        value: f64,
    ) -> Result<Trade, EngineError> {
        self.set_protective_level(trade_id, user_id, value, true)
    }

    pub fn set_take_profit(
        &self,
        trade_id: &str,
        user_id: &str,
        value: f64,
    ) -> Result<Trade, EngineError> {
        self.set_protective_level(trade_id, user_id, value, false)
    }

    fn set_protective_level(
        &self,
        trade_id: &str,
        user_id: &str,
        value: f64,
        is_stop_loss: bool,
    ) -> Result<Trade, EngineError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(EngineError::Validation(
                "protective level must be positive".to_string(),
            ));
        }

        let trade = self.trades.get(trade_id).ok_or(EngineError::TradeNotFound)?;
        if trade.user_id != user_id {
            return Err(EngineError::Forbidden);
        }

        let room_handle = self
            .rooms
            .get(&trade.room_id)
            .ok_or(EngineError::RoomNotFound)?;
        let mut room = room_handle.lock();

        // Trade and mirrored position are updated under the same room lock.
        let updated = self
            .trades
            .with_mut(trade_id, |trade| {
                if trade.status != TradeStatus::Open {
                    return Err(EngineError::AlreadyClosed);
                }
                if is_stop_loss {
                    trade.stop_loss = Some(value);
                } else {
                    trade.take_profit = Some(value);
                }
                Ok(trade.clone())
            })
            .ok_or(EngineError::TradeNotFound)??;

        if let Some(participant) = room.participant_mut(user_id) {
            if let Some(position) = participant
                .open_positions
                .iter_mut()
                .find(|p| p.timestamp == updated.entry_time)
            {
                if is_stop_loss {
                    position.stop_loss = Some(value);
                } else {
                    position.take_profit = Some(value);
                }
            }
        }

        Ok(updated)
    }

    /// Scan every open trade against the new price and close the ones whose
    /// stop-loss/take-profit fired. At most one trigger per trade per call.
    pub fn evaluate_triggers(&self, current_price: f64) -> Vec<Trade> {
        let mut fired: HashMap<String, Vec<String>> = HashMap::new();
        for trade in self.trades.open_trades() {
            if trade.trigger_hit(current_price).is_some() {
                fired.entry(trade.room_id.clone()).or_default().push(trade.id);
            }
        }

        let mut closed = Vec::new();
        for (room_id, trade_ids) in fired {
            let Some(room_handle) = self.rooms.get(&room_id) else {
                warn!("⚠️ [LEDGER] Trigger fired for unknown room {}", room_id);
                continue;
            };
            let mut room = room_handle.lock();

            for trade_id in trade_ids {
                // Re-read under the room lock: a user close may have won the race.
                let Some(trade) = self.trades.get(&trade_id) else { continue };
                let Some(trigger) = trade.trigger_hit(current_price) else { continue };

                match self.finalize_close(&mut room, &trade_id, current_price, trigger) {
                    Ok((closed_trade, _)) => {
                        info!(
                            "🎯 [LEDGER] Trade {} closed by {:?} at {} (profit {})",
                            closed_trade.id,
                            trigger,
                            current_price,
                            closed_trade.profit.unwrap_or(0.0)
                        );
                        closed.push(closed_trade);
                    }
                    Err(EngineError::AlreadyClosed) => {}
                    Err(e) => warn!("⚠️ [LEDGER] Failed to close trade {}: {}", trade_id, e),
                }
            }
        }

        closed
    }

    /// Force-close everything still open in the room at `price`. Called by the
    /// scheduler with the room lock already held; already-closed positions and
    /// trades are skipped, so a repeat call is a no-op.
    pub fn liquidate_room(&self, room: &mut Room, price: f64) -> HashMap<String, f64> {
        let mut totals: HashMap<String, f64> = HashMap::new();
        let closed_at = now_millis();

        for participant in room.participants.iter_mut() {
            let mut participant_pnl = 0.0;
            for position in participant.open_positions.iter_mut() {
                if position.status != PositionStatus::Open {
                    continue;
                }
                let position_pnl = pnl(position.side, position.entry_price, price, position.size);
                position.close_price = Some(price);
                position.closed_at = Some(closed_at);
                position.status = PositionStatus::Closed;
                position.pnl = position_pnl;
                participant_pnl += position_pnl;
            }

            participant.current_capital += participant_pnl;
            totals.insert(participant.user_id.clone(), participant_pnl);
        }

        // The standalone trade records close with the positions, in the same
        // critical section, so the two views never diverge.
        for trade in self.trades.open_trades_for_room(&room.id) {
            let closed = self.trades.with_mut(&trade.id, |trade| {
                if trade.status != TradeStatus::Open {
                    return None;
                }
                let profit = pnl(trade.side, trade.entry_price, price, trade.size);
                trade.status = TradeStatus::Closed;
                trade.exit_price = Some(price);
                trade.profit = Some(profit);
                trade.exit_time = Some(closed_at);
                trade.closed_by = Some(ClosedBy::System);
                trade.exit_candle = Some(CandleSnapshot::flat(price, closed_at));
                Some(trade.clone())
            });
            if let Some(Some(closed_trade)) = closed {
                self.trade_log.log_closed(&closed_trade);
            }
        }

        info!(
            "🏁 [LEDGER] Liquidated room {} at price {} ({} participants)",
            room.id,
            price,
            room.participants.len()
        );

        totals
    }

    /// Shared close path: marks the trade CLOSED, removes the mirrored
    /// position, credits the participant. Caller holds the room lock.
    fn finalize_close(
        &self,
        room: &mut Room,
        trade_id: &str,
        exit_price: f64,
        closed_by: ClosedBy,
    ) -> Result<(Trade, f64), EngineError> {
        let exit_time = now_millis();

        let closed_trade = self
            .trades
            .with_mut(trade_id, |trade| {
                if trade.status != TradeStatus::Open {
                    return Err(EngineError::AlreadyClosed);
                }
                let profit = pnl(trade.side, trade.entry_price, exit_price, trade.size);
                trade.status = TradeStatus::Closed;
                trade.exit_price = Some(exit_price);
                trade.profit = Some(profit);
                trade.exit_time = Some(exit_time);
                trade.closed_by = Some(closed_by);
                trade.exit_candle = Some(CandleSnapshot::flat(exit_price, exit_time));
                Ok(trade.clone())
            })
            .ok_or(EngineError::TradeNotFound)??;

        let profit = closed_trade.profit.unwrap_or(0.0);
        let room_id = room.id.clone();

        let user_id = closed_trade.user_id.clone();
        let participant = room.ensure_participant(&user_id, &user_id);

        let position_idx = participant
            .open_positions
            .iter()
            .position(|p| p.timestamp == closed_trade.entry_time);
        match position_idx {
            Some(idx) => {
                participant.open_positions.remove(idx);
            }
            None => {
                // Known leniency: the capital delta is applied anyway.
                warn!(
                    "⚠️ [LEDGER] No matching position for trade {} (entry {}) in room {}, applying capital delta only",
                    closed_trade.id, closed_trade.entry_time, room_id
                );
            }
        }

        participant.current_capital += profit;
        let current_capital = participant.current_capital;

        self.trade_log.log_closed(&closed_trade);

        Ok((closed_trade, current_capital))
    }
}
