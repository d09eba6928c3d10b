// src/trade_log.rs
// Daily CSV log of closed trades for offline analysis.

use std::fs::OpenOptions;
use std::path::Path;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::trades::Trade;

pub struct TradeCsvLog {
    logs_dir: String,
    // Serializes writers so concurrent closes don't interleave rows.
    write_guard: Mutex<()>,
}

impl TradeCsvLog {
    pub fn new(logs_dir: &str) -> Self {
        Self {
            logs_dir: logs_dir.to_string(),
            write_guard: Mutex::new(()),
        }
    }

    fn filename(&self) -> String {
        let date = chrono::Utc::now().format("%Y-%m-%d");
        format!("{}/trades_{}.csv", self.logs_dir, date)
    }

    /// Append one closed trade. Best effort: logging must never fail a close.
    pub fn log_closed(&self, trade: &Trade) {
        if let Err(e) = self.write_row(trade) {
            error!("❌ [TRADE_LOG] Failed to log closed trade {}: {}", trade.id, e);
        }
    }

    fn write_row(&self, trade: &Trade) -> Result<(), Box<dyn std::error::Error>> {
        let _guard = self.write_guard.lock();

        if !Path::new(&self.logs_dir).exists() {
            std::fs::create_dir_all(&self.logs_dir)?;
            info!("📁 [TRADE_LOG] Created logs directory: {}", self.logs_dir);
        }

        let filename = self.filename();
        let needs_headers = match std::fs::metadata(&filename) {
            Ok(metadata) => metadata.len() == 0,
            Err(_) => true,
        };

        let file = OpenOptions::new().create(true).append(true).open(&filename)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        if needs_headers {
            writer.write_record([
                "trade_id",
                "room_id",
                "user_id",
                "side",
                "entry_time",
                "exit_time",
                "entry_price",
                "exit_price",
                "size",
                "profit",
                "closed_by",
            ])?;
        }

        writer.write_record([
            trade.id.clone(),
            trade.room_id.clone(),
            trade.user_id.clone(),
            format!("{:?}", trade.side),
            trade.entry_time.to_string(),
            trade.exit_time.map(|t| t.to_string()).unwrap_or_default(),
            trade.entry_price.to_string(),
            trade.exit_price.map(|p| p.to_string()).unwrap_or_default(),
            trade.size.to_string(),
            trade.profit.map(|p| p.to_string()).unwrap_or_default(),
            trade
                .closed_by
                .map(|c| format!("{:?}", c))
                .unwrap_or_default(),
        ])?;

        writer.flush()?;
        Ok(())
    }
}
