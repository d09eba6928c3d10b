// src/events.rs
// Event fan-out between the engine and whatever transport sits on top of it.
// The core only publishes to this bus; the WebSocket layer subscribes.

use tokio::sync::broadcast;
use tracing::debug;

use crate::ranking::RankingSnapshot;
use crate::rooms::Winner;
use crate::trades::Trade;
use crate::types::Candle;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    PriceUpdate {
        price: f64,
        candle: Candle,
        is_new_candle: bool,
        server_time: i64,
    },
    CandleCompleted {
        candle: Candle,
    },
    RoomActivated {
        room_id: String,
        name: String,
    },
    RoomClosing {
        room_id: String,
        name: String,
    },
    RoomClosed {
        room_id: String,
        name: String,
        winners: Vec<Winner>,
    },
    OrderConfirmed {
        trade: Trade,
    },
    RankingUpdated {
        ranking: RankingSnapshot,
    },
    Error {
        message: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MarketEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Having no subscriber is normal
    /// (e.g. before the first client connects), not an error.
    pub fn publish(&self, event: MarketEvent) {
        if self.sender.send(event).is_err() {
            debug!("📭 [EVENT_BUS] No subscribers for event, dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.sender.subscribe()
    }
}
