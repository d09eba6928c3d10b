// src/rooms.rs
// Room, participant and position records plus the in-memory room registry.

use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::types::{now_millis, PositionStatus, RoomStatus, TradeSide};

pub const INITIAL_CAPITAL: f64 = 100_000.0;
pub const FREE_ROOM_SEED_POOL: f64 = 30.0;
pub const PRIZE_POOL_SHARE: f64 = 0.8;
pub const MAX_PAID_RANKS: usize = 7;
pub const DEFAULT_CAPACITY: usize = 25;
pub const MAX_CAPACITY: usize = 100;

lazy_static! {
    pub static ref DEFAULT_PRIZE_DISTRIBUTION: Vec<PrizeSlot> = vec![
        PrizeSlot { position: 1, percentage: 35.0 },
        PrizeSlot { position: 2, percentage: 25.0 },
        PrizeSlot { position: 3, percentage: 15.0 },
        PrizeSlot { position: 4, percentage: 10.0 },
        PrizeSlot { position: 5, percentage: 7.0 },
        PrizeSlot { position: 6, percentage: 5.0 },
        PrizeSlot { position: 7, percentage: 3.0 },
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrizeSlot {
    pub position: u32,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Winner {
    pub position: u32,
    pub user_id: String,
    pub username: String,
    pub final_capital: f64,
    pub prize: f64,
    pub paid: bool,
}

/// Per-participant mirror of an open trade, keyed back to its Trade record by
/// the shared entry timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub side: TradeSide,
    pub entry_price: f64,
    pub size: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub timestamp: i64,
    pub status: PositionStatus,
    pub close_price: Option<f64>,
    pub closed_at: Option<i64>,
    pub pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub username: String,
    pub initial_capital: f64,
    pub current_capital: f64,
    pub open_positions: Vec<Position>,
    pub joined_at: i64,
}

impl Participant {
    pub fn new(user_id: &str, username: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            initial_capital: INITIAL_CAPITAL,
            current_capital: INITIAL_CAPITAL,
            open_positions: Vec::new(),
            joined_at: now_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub entry_fee: f64,
    pub capacity: usize,
    pub participants: Vec<Participant>,
    pub competition_date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub status: RoomStatus,
    pub winners: Vec<Winner>,
    pub total_prize_pool: f64,
    pub prize_distribution: Vec<PrizeSlot>,
    pub created_at: i64,
}

impl Room {
    pub fn new(
        name: String,
        entry_fee: f64,
        capacity: Option<usize>,
        competition_date: NaiveDate,
        start_time: String,
        end_time: String,
        prize_distribution: Option<Vec<PrizeSlot>>,
    ) -> Self {
        // Free rooms carry a fixed seed pool; paid pools are derived from the
        // headcount and never stored at creation.
        let total_prize_pool = if entry_fee == 0.0 { FREE_ROOM_SEED_POOL } else { 0.0 };

        Self {
            id: Uuid::new_v4().to_string(),
            name,
            entry_fee,
            capacity: capacity.unwrap_or(DEFAULT_CAPACITY).min(MAX_CAPACITY),
            participants: Vec::new(),
            competition_date,
            start_time,
            end_time,
            status: RoomStatus::Pending,
            winners: Vec::new(),
            total_prize_pool,
            prize_distribution: prize_distribution
                .unwrap_or_else(|| DEFAULT_PRIZE_DISTRIBUTION.clone()),
            created_at: now_millis(),
        }
    }

    /// 80% of collected entry fees, floored. Only meaningful for paid rooms.
    pub fn calculate_prize_pool(&self) -> f64 {
        (self.entry_fee * self.participants.len() as f64 * PRIZE_POOL_SHARE).floor()
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.capacity
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn participant_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    /// Find or create the participant record for `user_id`. Trade operations
    /// enroll unknown users on the fly instead of failing.
    pub fn ensure_participant(&mut self, user_id: &str, username: &str) -> &mut Participant {
        if let Some(idx) = self.participants.iter().position(|p| p.user_id == user_id) {
            return &mut self.participants[idx];
        }

        info!(
            "👤 [ROOM] User {} auto-enrolled in room {} ({})",
            username, self.name, self.id
        );
        self.participants.push(Participant::new(user_id, username));
        self.participants.last_mut().unwrap()
    }

    /// Start/end of the daily window as minutes since midnight.
    pub fn window_minutes(&self) -> Option<(u32, u32)> {
        Some((parse_clock(&self.start_time)?, parse_clock(&self.end_time)?))
    }

    pub fn prize_percentage_for(&self, position: u32) -> f64 {
        self.prize_distribution
            .iter()
            .find(|slot| slot.position == position)
            .map(|slot| slot.percentage)
            .unwrap_or(0.0)
    }
}

/// Parse an "HH:MM" clock string into minutes since midnight.
pub fn parse_clock(value: &str) -> Option<u32> {
    let (hours, minutes) = value.split_once(':')?;
    let hours: u32 = hours.trim().parse().ok()?;
    let minutes: u32 = minutes.trim().parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// All known rooms, each behind its own lock. Every mutation of a room's
/// participant or position data happens while holding that room's mutex.
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Mutex<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self { rooms: DashMap::new() }
    }

    pub fn insert(&self, room: Room) -> Arc<Mutex<Room>> {
        let id = room.id.clone();
        let handle = Arc::new(Mutex::new(room));
        self.rooms.insert(id, handle.clone());
        handle
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.get(room_id).map(|entry| entry.value().clone())
    }

    pub fn all(&self) -> Vec<Arc<Mutex<Room>>> {
        self.rooms.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_room(entry_fee: f64) -> Room {
        Room::new(
            "Morning Cup".to_string(),
            entry_fee,
            None,
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            "08:00".to_string(),
            "17:00".to_string(),
            None,
        )
    }

    #[test]
    fn paid_room_prize_pool_is_80_percent_floored() {
        let mut room = test_room(10.0);
        for i in 0..5 {
            room.ensure_participant(&format!("user-{}", i), &format!("trader{}", i));
        }
        assert_eq!(room.calculate_prize_pool(), 40.0);
    }

    #[test]
    fn free_room_gets_seed_pool_at_creation() {
        let room = test_room(0.0);
        assert_eq!(room.total_prize_pool, FREE_ROOM_SEED_POOL);
    }

    #[test]
    fn ensure_participant_is_idempotent() {
        let mut room = test_room(10.0);
        room.ensure_participant("u1", "alice");
        room.ensure_participant("u1", "alice");
        assert_eq!(room.participants.len(), 1);
        assert_eq!(room.participants[0].current_capital, INITIAL_CAPITAL);
    }

    #[test]
    fn clock_parsing() {
        assert_eq!(parse_clock("08:00"), Some(480));
        assert_eq!(parse_clock("23:59"), Some(1439));
        assert_eq!(parse_clock("00:00"), Some(0));
        assert_eq!(parse_clock("24:00"), None);
        assert_eq!(parse_clock("nonsense"), None);
    }

    #[test]
    fn missing_prize_slot_defaults_to_zero() {
        let room = Room::new(
            "Tiny".to_string(),
            10.0,
            None,
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            "08:00".to_string(),
            "17:00".to_string(),
            Some(vec![
                PrizeSlot { position: 1, percentage: 50.0 },
                PrizeSlot { position: 2, percentage: 30.0 },
                PrizeSlot { position: 3, percentage: 20.0 },
            ]),
        );
        assert_eq!(room.prize_percentage_for(1), 50.0);
        assert_eq!(room.prize_percentage_for(4), 0.0);
    }
}
