// src/candle_store.rs
// Rolling store of finalized 1-minute candles plus higher-timeframe aggregation.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::errors::EngineError;
use crate::types::Candle;

pub struct CandleStore {
    candles: Mutex<VecDeque<Candle>>,
    capacity: usize,
}

impl CandleStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn push(&self, candle: Candle) {
        let mut candles = self.candles.lock();
        if candles.len() == self.capacity {
            candles.pop_front();
        }
        candles.push_back(candle);
    }

    pub fn len(&self) -> usize {
        self.candles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.lock().is_empty()
    }

    /// Newest-first history at the requested timeframe. Timeframe 1 reads the
    /// base series directly; anything larger is aggregated from consecutive
    /// groups of N base candles, and only complete groups are emitted.
    pub fn history(&self, timeframe: u32, limit: usize) -> Result<Vec<Candle>, EngineError> {
        if timeframe == 0 {
            return Err(EngineError::Validation(
                "timeframe must be at least 1 minute".to_string(),
            ));
        }

        let candles = self.candles.lock();
        if candles.is_empty() {
            return Ok(Vec::new());
        }

        if timeframe == 1 {
            return Ok(candles.iter().rev().take(limit).cloned().collect());
        }

        let group = timeframe as usize;
        // Newest-first base series, enough to fill `limit` full groups.
        let base: Vec<&Candle> = candles.iter().rev().take(limit * group).collect();

        let mut aggregated = Vec::new();
        for batch in base.chunks(group) {
            if batch.len() != group {
                break;
            }
            aggregated.push(aggregate_batch(batch, timeframe));
        }

        Ok(aggregated)
    }
}

/// Collapse a newest-first batch of base candles into one candle: open from
/// the oldest, close from the newest, extremes and volume across the batch.
fn aggregate_batch(batch: &[&Candle], timeframe: u32) -> Candle {
    let oldest = batch[batch.len() - 1];
    let newest = batch[0];

    let mut high = f64::NEG_INFINITY;
    let mut low = f64::INFINITY;
    let mut volume = 0.0;
    for candle in batch {
        high = high.max(candle.high);
        low = low.min(candle.low);
        volume += candle.volume;
    }

    Candle {
        timestamp: oldest.timestamp,
        open: oldest.open,
        high,
        low,
        close: newest.close,
        volume,
        timeframe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            timestamp: ts,
            open,
            high,
            low,
            close,
            volume,
            timeframe: 1,
        }
    }

    #[test]
    fn empty_store_returns_empty_history() {
        let store = CandleStore::new(100);
        assert!(store.history(1, 10).unwrap().is_empty());
        assert!(store.history(5, 10).unwrap().is_empty());
    }

    #[test]
    fn timeframe_one_is_newest_first() {
        let store = CandleStore::new(100);
        for i in 0..5 {
            store.push(candle(i, 100.0 + i as f64, 110.0, 90.0, 105.0, 10.0));
        }
        let history = store.history(1, 3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].timestamp, 4);
        assert_eq!(history[2].timestamp, 2);
    }

    #[test]
    fn aggregates_five_base_candles_into_timeframe_five() {
        let store = CandleStore::new(100);
        // Oldest to newest.
        store.push(candle(1, 100.0, 112.0, 98.0, 104.0, 10.0));
        store.push(candle(2, 104.0, 109.0, 101.0, 108.0, 20.0));
        store.push(candle(3, 108.0, 120.0, 99.0, 102.0, 30.0));
        store.push(candle(4, 102.0, 106.0, 95.0, 101.0, 40.0));
        store.push(candle(5, 101.0, 111.0, 100.0, 107.0, 50.0));

        let history = store.history(5, 10).unwrap();
        assert_eq!(history.len(), 1);

        let agg = &history[0];
        assert_eq!(agg.open, 100.0); // oldest open
        assert_eq!(agg.close, 107.0); // newest close
        assert_eq!(agg.high, 120.0);
        assert_eq!(agg.low, 95.0);
        assert_eq!(agg.volume, 150.0);
        assert_eq!(agg.timeframe, 5);
        assert_eq!(agg.timestamp, 1);
    }

    #[test]
    fn incomplete_groups_are_dropped() {
        let store = CandleStore::new(100);
        for i in 0..7 {
            store.push(candle(i, 100.0, 110.0, 90.0, 105.0, 1.0));
        }
        // 7 base candles, groups of 5: one complete group only.
        let history = store.history(5, 10).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn zero_timeframe_is_rejected() {
        let store = CandleStore::new(10);
        assert!(store.history(0, 10).is_err());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let store = CandleStore::new(3);
        for i in 0..5 {
            store.push(candle(i, 100.0, 110.0, 90.0, 105.0, 1.0));
        }
        let history = store.history(1, 10).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].timestamp, 4);
        assert_eq!(history[2].timestamp, 2);
    }
}
