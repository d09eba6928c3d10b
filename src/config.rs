// src/config.rs
use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Runtime knobs for the market engine. Everything has a default that matches
/// production behavior; tests shrink the intervals.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub initial_price: f64,
    pub tick_interval: Duration,
    pub candle_interval: Duration,
    pub reconcile_interval: Duration,
    pub closing_grace: Duration,
    pub candle_history_limit: usize,
    pub event_capacity: usize,
    pub logs_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_price: 10_000.0,
            tick_interval: Duration::from_millis(500),
            candle_interval: Duration::from_secs(60),
            reconcile_interval: Duration::from_secs(60),
            closing_grace: Duration::from_secs(5),
            candle_history_limit: 10_000,
            event_capacity: 1000,
            logs_dir: "logs".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            initial_price: env_f64("INITIAL_PRICE", defaults.initial_price),
            tick_interval: Duration::from_millis(env_u64("TICK_INTERVAL_MS", 500)),
            candle_interval: Duration::from_secs(env_u64("CANDLE_INTERVAL_SECS", 60)),
            reconcile_interval: Duration::from_secs(env_u64("RECONCILE_INTERVAL_SECS", 60)),
            closing_grace: Duration::from_secs(env_u64("CLOSING_GRACE_SECS", 5)),
            candle_history_limit: env_u64("CANDLE_HISTORY_LIMIT", 10_000) as usize,
            event_capacity: env_u64("EVENT_CAPACITY", 1000) as usize,
            logs_dir: std::env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string()),
        }
    }
}
