// src/scheduler.rs
// Wall-clock driven room lifecycle: PENDING -> ACTIVE -> CLOSING -> CLOSED.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Timelike};
use dashmap::DashSet;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::errors::EngineError;
use crate::events::{EventBus, MarketEvent};
use crate::generator::PriceGenerator;
use crate::ledger::TradeLedger;
use crate::ranking::RankingService;
use crate::rooms::{RoomRegistry, Winner, MAX_PAID_RANKS};
use crate::types::RoomStatus;

pub struct RoomScheduler {
    rooms: Arc<RoomRegistry>,
    ledger: Arc<TradeLedger>,
    ranking: Arc<RankingService>,
    generator: Arc<Mutex<PriceGenerator>>,
    bus: EventBus,
    /// Rooms currently ACTIVE; the market is open while this is non-empty.
    active_rooms: DashSet<String>,
    /// Rooms with a closure in flight. Inserted before the grace sleep,
    /// removed only after the closure finishes, so concurrent reconcile
    /// passes cannot double-liquidate.
    closing_guard: DashSet<String>,
    closing_grace: Duration,
    initial_price: f64,
}

impl RoomScheduler {
    pub fn new(
        rooms: Arc<RoomRegistry>,
        ledger: Arc<TradeLedger>,
        ranking: Arc<RankingService>,
        generator: Arc<Mutex<PriceGenerator>>,
        bus: EventBus,
        closing_grace: Duration,
        initial_price: f64,
    ) -> Self {
        Self {
            rooms,
            ledger,
            ranking,
            generator,
            bus,
            active_rooms: DashSet::new(),
            closing_guard: DashSet::new(),
            closing_grace,
            initial_price,
        }
    }

    pub fn market_open(&self) -> bool {
        !self.active_rooms.is_empty()
    }

    pub fn active_room_ids(&self) -> Vec<String> {
        self.active_rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    /// One reconcile pass against the wall clock. Only the time of day is
    /// compared, not the calendar date (see DESIGN.md).
    pub fn reconcile(self: &Arc<Self>, now: DateTime<Local>) {
        self.reconcile_minutes(now.hour() * 60 + now.minute());
    }

    /// Reconcile against an explicit minute-of-day. One room's failure never
    /// stops the others; each is retried on the next pass.
    pub fn reconcile_minutes(self: &Arc<Self>, now_minutes: u32) {
        for room_handle in self.rooms.all() {
            let (room_id, status, window) = {
                let room = room_handle.lock();
                (room.id.clone(), room.status, room.window_minutes())
            };

            let Some((start_minutes, end_minutes)) = window else {
                warn!("⚠️ [SCHEDULER] Room {} has an unparseable time window", room_id);
                continue;
            };

            match status {
                RoomStatus::Pending
                    if now_minutes >= start_minutes && now_minutes < end_minutes =>
                {
                    self.activate(&room_id);
                }
                RoomStatus::Active if now_minutes >= end_minutes => {
                    self.begin_close(&room_id);
                }
                _ => {}
            }
        }

        // Live leaderboards for everything still running.
        for room_id in self.active_room_ids() {
            if let Some(room_handle) = self.rooms.get(&room_id) {
                let snapshot = {
                    let room = room_handle.lock();
                    self.ranking.refresh(&room)
                };
                self.bus.publish(MarketEvent::RankingUpdated { ranking: snapshot });
            }
        }
    }

    /// PENDING -> ACTIVE. Participants restart from their initial capital,
    /// with no open positions. The status check under the room lock makes a
    /// second concurrent pass a no-op.
    fn activate(&self, room_id: &str) {
        let Some(room_handle) = self.rooms.get(room_id) else { return };

        let (name, snapshot) = {
            let mut room = room_handle.lock();
            if room.status != RoomStatus::Pending {
                return;
            }

            room.status = RoomStatus::Active;
            for participant in room.participants.iter_mut() {
                participant.current_capital = participant.initial_capital;
                participant.open_positions.clear();
            }

            (room.name.clone(), self.ranking.refresh(&room))
        };

        self.active_rooms.insert(room_id.to_string());

        // First room of the session: fresh walk, fresh randomness.
        if self.active_rooms.len() == 1 {
            self.generator.lock().reset(self.initial_price);
        }

        info!("🟢 [SCHEDULER] Room {} ({}) activated", name, room_id);
        self.bus.publish(MarketEvent::RoomActivated {
            room_id: room_id.to_string(),
            name,
        });
        self.bus.publish(MarketEvent::RankingUpdated { ranking: snapshot });
    }

    /// ACTIVE -> CLOSING, then CLOSED after the grace window. The guard entry
    /// is taken before anything else; if it is already present another pass
    /// owns this closure.
    fn begin_close(self: &Arc<Self>, room_id: &str) {
        if !self.closing_guard.insert(room_id.to_string()) {
            debug!("⏳ [SCHEDULER] Room {} is already being closed, skipping", room_id);
            return;
        }

        let Some(room_handle) = self.rooms.get(room_id) else {
            self.closing_guard.remove(room_id);
            return;
        };

        let name = {
            let mut room = room_handle.lock();
            if room.status != RoomStatus::Active {
                drop(room);
                self.closing_guard.remove(room_id);
                return;
            }
            room.status = RoomStatus::Closing;
            room.name.clone()
        };

        info!(
            "🟠 [SCHEDULER] Room {} ({}) closing, orders rejected for {:?}",
            name, room_id, self.closing_grace
        );
        self.bus.publish(MarketEvent::RoomClosing {
            room_id: room_id.to_string(),
            name,
        });

        let scheduler = Arc::clone(self);
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.closing_grace).await;
            if let Err(e) = scheduler.finish_close(&room_id) {
                error!("❌ [SCHEDULER] Failed to close room {}: {}", room_id, e);
            }
            scheduler.closing_guard.remove(&room_id);
        });
    }

    /// CLOSING -> CLOSED: liquidate, rank, assign prizes. Runs once per
    /// closure; the guard set serializes it against concurrent reconciles.
    fn finish_close(&self, room_id: &str) -> Result<(), EngineError> {
        let room_handle = self.rooms.get(room_id).ok_or(EngineError::RoomNotFound)?;
        let price = self.ledger.current_price();

        let (name, winners, final_snapshot) = {
            let mut room = room_handle.lock();
            if room.status != RoomStatus::Closing {
                warn!(
                    "⚠️ [SCHEDULER] Room {} not in CLOSING state ({:?}), skipping closure",
                    room_id, room.status
                );
                return Ok(());
            }

            if room.entry_fee > 0.0 {
                room.total_prize_pool = room.calculate_prize_pool();
            }

            self.ledger.liquidate_room(&mut room, price);

            let snapshot = RankingService::compute(&room);
            let paid_ranks = snapshot.ranking.len().min(MAX_PAID_RANKS);
            let mut winners = Vec::with_capacity(paid_ranks);
            for entry in snapshot.ranking.iter().take(paid_ranks) {
                let percentage = room.prize_percentage_for(entry.position);
                let prize = (room.total_prize_pool * percentage / 100.0).floor();
                winners.push(Winner {
                    position: entry.position,
                    user_id: entry.user_id.clone(),
                    username: entry.username.clone(),
                    final_capital: entry.capital,
                    prize,
                    paid: false,
                });
            }

            room.winners = winners.clone();
            room.status = RoomStatus::Closed;

            (room.name.clone(), winners, self.ranking.refresh(&room))
        };

        self.active_rooms.remove(room_id);

        info!(
            "🔴 [SCHEDULER] Room {} ({}) closed at price {}, {} winners",
            name,
            room_id,
            price,
            winners.len()
        );
        self.bus.publish(MarketEvent::RoomClosed {
            room_id: room_id.to_string(),
            name,
            winners,
        });
        self.bus.publish(MarketEvent::RankingUpdated { ranking: final_snapshot });

        Ok(())
    }
}
