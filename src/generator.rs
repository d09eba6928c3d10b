// src/generator.rs
// Synthetic price feed: a trend-biased random walk aggregated into candles.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::types::{now_millis, Candle};

/// Pseudo-random walk price source. Owns the in-progress candle; every tick
/// mutates it, `finalize_candle` snapshots it and starts the next one.
///
/// Single-writer: tick and finalize must never run concurrently, the caller
/// wraps this in a mutex and holds it for the whole call.
pub struct PriceGenerator {
    pub last_price: f64,
    forming: Candle,
    trend_bias: f64,
    volatility_factor: f64,
    trend_duration: u32,
    max_trend_duration: u32,
    rng: StdRng,
}

impl PriceGenerator {
    pub fn new(initial_price: f64) -> Self {
        Self::with_rng(initial_price, StdRng::from_entropy())
    }

    /// Seedable constructor so tests get a reproducible walk.
    pub fn seeded(initial_price: f64, seed: u64) -> Self {
        Self::with_rng(initial_price, StdRng::seed_from_u64(seed))
    }

    fn with_rng(initial_price: f64, rng: StdRng) -> Self {
        let mut generator = Self {
            last_price: initial_price,
            forming: Candle {
                timestamp: now_millis(),
                open: initial_price,
                high: initial_price,
                low: initial_price,
                close: initial_price,
                volume: 0.0,
                timeframe: 1,
            },
            trend_bias: 0.0,
            volatility_factor: 0.002,
            trend_duration: 0,
            max_trend_duration: 100,
            rng,
        };
        generator.reset_trend();
        generator
    }

    /// Re-seed the walk at `price`, as if the market just opened.
    pub fn reset(&mut self, price: f64) {
        info!("🔄 [GENERATOR] Resetting generator at price {}", price);
        self.last_price = price;
        self.reset_trend();
        self.start_new_candle(1);
    }

    /// Draw a fresh market phase: new drift, new volatility, new duration.
    pub fn reset_trend(&mut self) {
        self.trend_bias = self.rng.gen_range(-0.1..=0.1);
        self.trend_duration = 0;
        self.max_trend_duration = self.rng.gen_range(40..=120);
        self.volatility_factor = self.rng.gen_range(0.0001..=0.0005);

        debug!(
            "📈 [GENERATOR] New trend: bias={:.4}, volatility={:.6}, max duration={}",
            self.trend_bias, self.volatility_factor, self.max_trend_duration
        );
    }

    /// Pin the trend for the next `duration` ticks. Handy in demos and tests.
    pub fn force_trend(&mut self, bias: f64, duration: u32) {
        self.trend_bias = bias.clamp(-1.0, 1.0);
        self.trend_duration = 0;
        self.max_trend_duration = duration;
    }

    fn start_new_candle(&mut self, timeframe: u32) {
        self.forming = Candle {
            timestamp: now_millis(),
            open: self.last_price,
            high: self.last_price,
            low: self.last_price,
            close: self.last_price,
            volume: 0.0,
            timeframe,
        };
    }

    /// Advance the walk by one tick and fold the move into the forming candle.
    /// Prices are whole units, floored at 1.
    pub fn tick(&mut self) -> f64 {
        self.trend_duration += 1;
        if self.trend_duration >= self.max_trend_duration {
            self.reset_trend();
        }

        let random_component = (self.rng.gen::<f64>() - 0.5) * 2.0 * self.volatility_factor;
        let trend_component = self.trend_bias * self.volatility_factor * 0.5;
        let total_change = self.last_price * (random_component + trend_component);

        let new_price = (self.last_price + total_change).round().max(1.0);

        self.forming.close = new_price;
        self.forming.high = self.forming.high.max(new_price);
        self.forming.low = self.forming.low.min(new_price);

        // Volume scales with the size of the move.
        let volume_factor = 500.0 + total_change.abs() * 50.0;
        self.forming.volume += (self.rng.gen::<f64>() * volume_factor).floor();

        self.last_price = new_price;
        new_price
    }

    /// Snapshot the forming candle, start a fresh one opening at the last
    /// price. A new candle has a 20% chance of partially inverting the trend.
    pub fn finalize_candle(&mut self, timeframe: u32) -> Candle {
        let finalized = self.forming.clone();
        self.start_new_candle(timeframe);

        if self.rng.gen::<f64>() < 0.2 {
            self.trend_bias *= -0.8;
            debug!("📉 [GENERATOR] Trend partially inverted to {:.4}", self.trend_bias);
        }

        finalized
    }

    /// Read-only snapshot of the candle being formed.
    pub fn current_candle(&self) -> Candle {
        self.forming.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_never_drops_below_one() {
        let mut generator = PriceGenerator::seeded(2.0, 7);
        // Crank volatility way up so the floor actually gets exercised.
        generator.volatility_factor = 0.9;
        generator.max_trend_duration = u32::MAX;
        generator.trend_bias = -1.0;

        for _ in 0..5_000 {
            let price = generator.tick();
            assert!(price >= 1.0, "price fell below floor: {}", price);
        }
    }

    #[test]
    fn candle_bounds_track_ticks() {
        let mut generator = PriceGenerator::seeded(10_000.0, 42);
        for _ in 0..200 {
            generator.tick();
        }
        let candle = generator.current_candle();
        assert!(candle.high >= candle.open.max(candle.close));
        assert!(candle.low <= candle.open.min(candle.close));
        assert!(candle.volume >= 0.0);
    }

    #[test]
    fn finalize_starts_flat_candle_at_last_price() {
        let mut generator = PriceGenerator::seeded(10_000.0, 3);
        for _ in 0..50 {
            generator.tick();
        }
        let last = generator.last_price;
        let finalized = generator.finalize_candle(1);
        assert_eq!(finalized.close, last);

        let fresh = generator.current_candle();
        assert_eq!(fresh.open, last);
        assert_eq!(fresh.high, last);
        assert_eq!(fresh.low, last);
        assert_eq!(fresh.close, last);
        assert_eq!(fresh.volume, 0.0);
    }

    #[test]
    fn trend_reset_stays_in_bounds() {
        let mut generator = PriceGenerator::seeded(10_000.0, 11);
        for _ in 0..100 {
            generator.reset_trend();
            assert!(generator.trend_bias >= -0.1 && generator.trend_bias <= 0.1);
            assert!(generator.volatility_factor >= 0.0001 && generator.volatility_factor <= 0.0005);
            assert!(generator.max_trend_duration >= 40 && generator.max_trend_duration <= 120);
        }
    }
}
