// src/ranking.rs
// Leaderboard computation plus the process-scoped snapshot cache the
// notification layer reads from.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::rooms::Room;
use crate::types::{now_millis, RoomStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingEntry {
    pub position: u32,
    pub user_id: String,
    pub username: String,
    pub capital: f64,
    pub profit_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingSnapshot {
    pub room_id: String,
    pub room_name: String,
    pub room_status: RoomStatus,
    pub ranking: Vec<RankingEntry>,
    pub updated_at: i64,
}

pub struct RankingService {
    cache: RwLock<HashMap<String, RankingSnapshot>>,
}

impl RankingService {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Pure leaderboard over a room's participants: capital descending, ties
    /// kept in join order. Safe to call at any room status.
    pub fn compute(room: &Room) -> RankingSnapshot {
        let mut sorted: Vec<&crate::rooms::Participant> = room.participants.iter().collect();
        sorted.sort_by(|a, b| {
            b.current_capital
                .partial_cmp(&a.current_capital)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let ranking = sorted
            .iter()
            .enumerate()
            .map(|(idx, participant)| RankingEntry {
                position: idx as u32 + 1,
                user_id: participant.user_id.clone(),
                username: participant.username.clone(),
                capital: participant.current_capital,
                profit_percentage: (participant.current_capital / participant.initial_capital
                    - 1.0)
                    * 100.0,
            })
            .collect();

        RankingSnapshot {
            room_id: room.id.clone(),
            room_name: room.name.clone(),
            room_status: room.status,
            ranking,
            updated_at: now_millis(),
        }
    }

    /// Recompute and cache the snapshot for a room.
    pub fn refresh(&self, room: &Room) -> RankingSnapshot {
        let snapshot = Self::compute(room);
        self.cache.write().insert(room.id.clone(), snapshot.clone());
        snapshot
    }

    pub fn cached(&self, room_id: &str) -> Option<RankingSnapshot> {
        self.cache.read().get(room_id).cloned()
    }
}

impl Default for RankingService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::Room;
    use chrono::NaiveDate;

    fn room_with_capitals(capitals: &[f64]) -> Room {
        let mut room = Room::new(
            "Cup".to_string(),
            10.0,
            None,
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            "08:00".to_string(),
            "17:00".to_string(),
            None,
        );
        for (i, capital) in capitals.iter().enumerate() {
            let participant = room.ensure_participant(&format!("u{}", i), &format!("trader{}", i));
            participant.current_capital = *capital;
        }
        room
    }

    #[test]
    fn ranking_sorts_by_capital_descending() {
        let room = room_with_capitals(&[90_000.0, 120_000.0, 100_000.0]);
        let snapshot = RankingService::compute(&room);

        assert_eq!(snapshot.ranking.len(), 3);
        assert_eq!(snapshot.ranking[0].user_id, "u1");
        assert_eq!(snapshot.ranking[1].user_id, "u2");
        assert_eq!(snapshot.ranking[2].user_id, "u0");
        assert_eq!(snapshot.ranking[0].position, 1);
        assert_eq!(snapshot.ranking[2].position, 3);
    }

    #[test]
    fn ties_keep_join_order() {
        let room = room_with_capitals(&[100_000.0, 100_000.0, 100_000.0]);
        let snapshot = RankingService::compute(&room);
        assert_eq!(snapshot.ranking[0].user_id, "u0");
        assert_eq!(snapshot.ranking[1].user_id, "u1");
        assert_eq!(snapshot.ranking[2].user_id, "u2");
    }

    #[test]
    fn profit_percentage_is_relative_to_initial_capital() {
        let room = room_with_capitals(&[110_000.0, 75_000.0]);
        let snapshot = RankingService::compute(&room);
        assert!((snapshot.ranking[0].profit_percentage - 10.0).abs() < 1e-9);
        assert!((snapshot.ranking[1].profit_percentage + 25.0).abs() < 1e-9);
    }

    #[test]
    fn refresh_populates_cache() {
        let service = RankingService::new();
        let room = room_with_capitals(&[100_000.0]);
        assert!(service.cached(&room.id).is_none());
        service.refresh(&room);
        assert_eq!(service.cached(&room.id).unwrap().ranking.len(), 1);
    }
}
