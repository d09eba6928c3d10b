// src/market.rs
// MarketService: the engine facade the transport layers talk to, plus the
// periodic drivers (price tick, candle finalize, schedule reconcile).

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::candle_store::CandleStore;
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::events::{EventBus, MarketEvent};
use crate::generator::PriceGenerator;
use crate::ledger::{CloseSummary, TradeLedger};
use crate::ranking::{RankingService, RankingSnapshot};
use crate::rooms::{Participant, PrizeSlot, Room, RoomRegistry};
use crate::scheduler::RoomScheduler;
use crate::trade_log::TradeCsvLog;
use crate::trades::{Trade, TradeStore};
use crate::types::{now_millis, Candle, OrderKind, RoomStatus, TradeSide, TradeStatus};

/// What an order submission produced: a fresh trade, or a flatten summary.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OrderOutcome {
    Opened(Trade),
    Flattened(CloseSummary),
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub entry_fee: f64,
    pub capacity: usize,
    pub participant_count: usize,
    pub available_spots: usize,
    pub competition_date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub status: RoomStatus,
    pub total_prize_pool: f64,
}

impl RoomSummary {
    fn from_room(room: &Room) -> Self {
        // Paid pools are presented from the live headcount, not the stored
        // value, which is only settled at closure.
        let total_prize_pool = if room.entry_fee > 0.0 && !room.participants.is_empty() {
            room.calculate_prize_pool()
        } else {
            room.total_prize_pool
        };

        Self {
            id: room.id.clone(),
            name: room.name.clone(),
            entry_fee: room.entry_fee,
            capacity: room.capacity,
            participant_count: room.participants.len(),
            available_spots: room.capacity.saturating_sub(room.participants.len()),
            competition_date: room.competition_date,
            start_time: room.start_time.clone(),
            end_time: room.end_time.clone(),
            status: room.status,
            total_prize_pool,
        }
    }
}

/// A user's live standing in a room: capital plus open positions.
#[derive(Debug, Clone, Serialize)]
pub struct UserPosition {
    pub current_capital: f64,
    pub open_positions: Vec<crate::rooms::Position>,
}

pub struct MarketService {
    pub config: EngineConfig,
    pub generator: Arc<Mutex<PriceGenerator>>,
    pub candles: Arc<CandleStore>,
    pub rooms: Arc<RoomRegistry>,
    pub trades: Arc<TradeStore>,
    pub ledger: Arc<TradeLedger>,
    pub scheduler: Arc<RoomScheduler>,
    pub ranking: Arc<RankingService>,
    pub bus: EventBus,
}

impl MarketService {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let generator = Arc::new(Mutex::new(PriceGenerator::new(config.initial_price)));
        let candles = Arc::new(CandleStore::new(config.candle_history_limit));
        let rooms = Arc::new(RoomRegistry::new());
        let trades = Arc::new(TradeStore::new());
        let ranking = Arc::new(RankingService::new());
        let bus = EventBus::new(config.event_capacity);
        let trade_log = Arc::new(TradeCsvLog::new(&config.logs_dir));

        let ledger = Arc::new(TradeLedger::new(
            rooms.clone(),
            trades.clone(),
            generator.clone(),
            trade_log,
        ));

        let scheduler = Arc::new(RoomScheduler::new(
            rooms.clone(),
            ledger.clone(),
            ranking.clone(),
            generator.clone(),
            bus.clone(),
            config.closing_grace,
            config.initial_price,
        ));

        Arc::new(Self {
            config,
            generator,
            candles,
            rooms,
            trades,
            ledger,
            scheduler,
            ranking,
            bus,
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MarketEvent> {
        self.bus.subscribe()
    }

    // --- Price & candles ---------------------------------------------------

    pub fn current_price(&self) -> f64 {
        self.generator.lock().last_price
    }

    pub fn current_candle(&self) -> Candle {
        self.generator.lock().current_candle()
    }

    pub fn historical_candles(&self, timeframe: u32, limit: usize) -> Result<Vec<Candle>, EngineError> {
        self.candles.history(timeframe, limit)
    }

    // --- Orders ------------------------------------------------------------

    /// Entry point for order submissions from any transport. LONG/SHORT opens
    /// a position, CLOSE flattens the user's book in the room.
    pub fn place_order(
        &self,
        user_id: &str,
        username: &str,
        room_id: &str,
        kind: OrderKind,
        size: f64,
    ) -> Result<OrderOutcome, EngineError> {
        let outcome = match kind {
            OrderKind::Close => OrderOutcome::Flattened(
                self.ledger.close_all_for_user(user_id, username, room_id)?,
            ),
            OrderKind::Long => {
                OrderOutcome::Opened(self.ledger.open_position(
                    user_id,
                    username,
                    room_id,
                    TradeSide::Long,
                    size,
                )?)
            }
            OrderKind::Short => {
                OrderOutcome::Opened(self.ledger.open_position(
                    user_id,
                    username,
                    room_id,
                    TradeSide::Short,
                    size,
                )?)
            }
        };

        if let OrderOutcome::Opened(trade) = &outcome {
            self.bus.publish(MarketEvent::OrderConfirmed { trade: trade.clone() });
        }
        self.broadcast_ranking(room_id);

        Ok(outcome)
    }

    pub fn close_trade(&self, trade_id: &str, user_id: &str) -> Result<(Trade, f64), EngineError> {
        let result = self.ledger.close_trade(trade_id, user_id)?;
        self.broadcast_ranking(&result.0.room_id);
        Ok(result)
    }

    pub fn set_stop_loss(&self, trade_id: &str, user_id: &str, value: f64) -> Result<Trade, EngineError> {
        self.ledger.set_stop_loss(trade_id, user_id, value)
    }

    pub fn set_take_profit(&self, trade_id: &str, user_id: &str, value: f64) -> Result<Trade, EngineError> {
        self.ledger.set_take_profit(trade_id, user_id, value)
    }

    pub fn user_trades(
        &self,
        user_id: &str,
        room_id: Option<&str>,
        status: Option<TradeStatus>,
    ) -> Vec<Trade> {
        self.trades.user_trades(user_id, room_id, status)
    }

    /// A user's open trades in a room plus their participant standing,
    /// enrolling them on the fly like every other trade-engine operation.
    pub fn active_trades(
        &self,
        user_id: &str,
        username: &str,
        room_id: &str,
    ) -> Result<(Vec<Trade>, UserPosition), EngineError> {
        let room_handle = self.rooms.get(room_id).ok_or(EngineError::RoomNotFound)?;
        let trades = self.trades.open_trades_for_user(user_id, room_id);

        let mut room = room_handle.lock();
        let participant = room.ensure_participant(user_id, username);
        let position = UserPosition {
            current_capital: participant.current_capital,
            open_positions: participant.open_positions.clone(),
        };

        Ok((trades, position))
    }

    // --- Rooms -------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_room(
        &self,
        name: String,
        entry_fee: f64,
        capacity: Option<usize>,
        competition_date: NaiveDate,
        start_time: String,
        end_time: String,
        prize_distribution: Option<Vec<PrizeSlot>>,
    ) -> Result<RoomSummary, EngineError> {
        if name.trim().is_empty() || name.len() > 100 {
            return Err(EngineError::Validation(
                "room name must be 1-100 characters".to_string(),
            ));
        }
        if !entry_fee.is_finite() || entry_fee < 0.0 {
            return Err(EngineError::Validation("entry fee must be >= 0".to_string()));
        }
        if crate::rooms::parse_clock(&start_time).is_none()
            || crate::rooms::parse_clock(&end_time).is_none()
        {
            return Err(EngineError::Validation(
                "start/end times must be HH:MM".to_string(),
            ));
        }

        let room = Room::new(
            name,
            entry_fee,
            capacity,
            competition_date,
            start_time,
            end_time,
            prize_distribution,
        );
        let summary = RoomSummary::from_room(&room);
        info!("🏟️ [MARKET] Created room {} ({})", summary.name, summary.id);
        self.rooms.insert(room);
        Ok(summary)
    }

    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = self
            .rooms
            .all()
            .iter()
            .map(|handle| RoomSummary::from_room(&handle.lock()))
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    pub fn room_detail(&self, room_id: &str) -> Result<Room, EngineError> {
        let room_handle = self.rooms.get(room_id).ok_or(EngineError::RoomNotFound)?;
        let room = room_handle.lock();
        Ok(room.clone())
    }

    /// Explicit join with an entry-fee balance check. The caller supplies the
    /// user's wallet balance; deducting it is the caller's business.
    pub fn join_room(
        &self,
        room_id: &str,
        user_id: &str,
        username: &str,
        balance: f64,
    ) -> Result<RoomSummary, EngineError> {
        let room_handle = self.rooms.get(room_id).ok_or(EngineError::RoomNotFound)?;
        let mut room = room_handle.lock();

        if matches!(room.status, RoomStatus::Closing | RoomStatus::Closed) {
            return Err(EngineError::RoomNotActive);
        }
        if room.is_full() {
            return Err(EngineError::RoomFull);
        }
        if room.participant(user_id).is_some() {
            return Err(EngineError::Validation(
                "user already joined this room".to_string(),
            ));
        }
        if balance < room.entry_fee {
            return Err(EngineError::InsufficientBalance);
        }

        room.participants.push(Participant::new(user_id, username));
        if room.entry_fee > 0.0 {
            room.total_prize_pool = room.calculate_prize_pool();
        }

        info!(
            "🎟️ [MARKET] User {} joined room {} ({}/{})",
            username,
            room.name,
            room.participants.len(),
            room.capacity
        );

        Ok(RoomSummary::from_room(&room))
    }

    pub fn room_ranking(&self, room_id: &str) -> Result<RankingSnapshot, EngineError> {
        let room_handle = self.rooms.get(room_id).ok_or(EngineError::RoomNotFound)?;
        let room = room_handle.lock();
        Ok(self.ranking.refresh(&room))
    }

    fn broadcast_ranking(&self, room_id: &str) {
        if let Some(room_handle) = self.rooms.get(room_id) {
            let snapshot = {
                let room = room_handle.lock();
                self.ranking.refresh(&room)
            };
            self.bus.publish(MarketEvent::RankingUpdated { ranking: snapshot });
        }
    }

    // --- Drivers -----------------------------------------------------------

    /// Spawn the three periodic drivers. Tick and candle finalize never run
    /// concurrently: both take the generator mutex for the whole call.
    pub fn start_drivers(self: &Arc<Self>) {
        let market = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(market.config.tick_interval);
            interval.tick().await; // consume the immediate first tick
            loop {
                interval.tick().await;
                market.run_price_tick();
            }
        });

        let market = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(market.config.candle_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                market.run_candle_finalize();
            }
        });

        let market = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(market.config.reconcile_interval);
            loop {
                // First pass runs immediately at startup.
                interval.tick().await;
                market.scheduler.reconcile(Local::now());
            }
        });

        info!(
            "⚙️ [MARKET] Drivers started: tick {:?}, candle {:?}, reconcile {:?}",
            self.config.tick_interval, self.config.candle_interval, self.config.reconcile_interval
        );
    }

    /// One price tick: advance the walk, fire triggers while the market is
    /// open, notify.
    pub fn run_price_tick(&self) {
        let (price, candle) = {
            let mut generator = self.generator.lock();
            let price = generator.tick();
            (price, generator.current_candle())
        };

        if self.scheduler.market_open() {
            self.ledger.evaluate_triggers(price);
        }

        self.bus.publish(MarketEvent::PriceUpdate {
            price,
            candle,
            is_new_candle: false,
            server_time: now_millis(),
        });
    }

    /// One candle rollover: snapshot the forming candle into history and
    /// notify with the completed candle.
    pub fn run_candle_finalize(&self) {
        let candle = self.generator.lock().finalize_candle(1);
        self.candles.push(candle.clone());

        self.bus.publish(MarketEvent::CandleCompleted { candle: candle.clone() });
        self.bus.publish(MarketEvent::PriceUpdate {
            price: candle.close,
            candle,
            is_new_candle: true,
            server_time: now_millis(),
        });
    }
}
