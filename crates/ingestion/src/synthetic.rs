//! Seeded synthetic market generator.
//!
//! Mean-reverting mid price with Gaussian shocks and rare jumps, plus
//! spread, high/low range and volume columns.

use crate::series::{RawTick, RawTimestamp, TickSeries};
use mmsim_core::{Error, Result, TimestampMs};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Normal};

/// Synthetic market configuration.
#[derive(Debug, Clone)]
pub struct SyntheticMarketConfig {
    /// Number of ticks to generate.
    pub n_periods: usize,
    /// Starting (and mean-reversion target) price.
    pub initial_price: f64,
    /// Per-step shock size as a fraction of price.
    pub volatility: f64,
    /// Pull towards the initial price per step.
    pub mean_reversion: f64,
    /// Probability of a jump on any step.
    pub jump_probability: f64,
    /// Jump size multiplier on the shock std.
    pub jump_scale: f64,
    /// Mean relative spread.
    pub spread_mean: f64,
    /// Std of the relative spread.
    pub spread_std: f64,
    /// First timestamp.
    pub start_ts_ms: TimestampMs,
    /// Milliseconds between ticks.
    pub interval_ms: i64,
    /// Rolling window for derived volatility.
    pub volatility_window: usize,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SyntheticMarketConfig {
    fn default() -> Self {
        Self {
            n_periods: 1000,
            initial_price: 1000.0,
            volatility: 0.01,
            mean_reversion: 0.1,
            jump_probability: 0.01,
            jump_scale: 5.0,
            spread_mean: 0.001,
            spread_std: 0.0005,
            start_ts_ms: 1_767_225_600_000, // 2026-01-01T00:00:00Z
            interval_ms: 60_000,
            volatility_window: 20,
            seed: 42,
        }
    }
}

/// Seeded synthetic market generator.
pub struct SyntheticMarket {
    config: SyntheticMarketConfig,
    rng: StdRng,
    unit: Normal<f64>,
    volume: Exp<f64>,
}

impl SyntheticMarket {
    /// Create a generator.
    pub fn new(config: SyntheticMarketConfig) -> Result<Self> {
        if !(config.initial_price > 0.0) {
            return Err(Error::config("initial_price must be > 0"));
        }
        if !(config.volatility >= 0.0) || !(config.spread_std >= 0.0) {
            return Err(Error::config("volatility and spread_std must be >= 0"));
        }
        if config.interval_ms <= 0 {
            return Err(Error::config("interval_ms must be > 0"));
        }
        let unit = Normal::new(0.0, 1.0).map_err(|e| Error::config(e.to_string()))?;
        let volume = Exp::new(1.0 / 100.0).map_err(|e| Error::config(e.to_string()))?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            rng,
            unit,
            volume,
        })
    }

    /// Generate the raw records.
    pub fn generate_raw(&mut self) -> Vec<RawTick> {
        let cfg = &self.config;
        let unit = self.unit;
        let volume_dist = self.volume;

        let mut records = Vec::with_capacity(cfg.n_periods);
        let mut price = cfg.initial_price;

        for i in 0..cfg.n_periods {
            if i > 0 {
                let mean_rev = cfg.mean_reversion * (cfg.initial_price - price);
                let shock = unit.sample(&mut self.rng) * cfg.volatility * price;
                let jump = if self.rng.gen::<f64>() < cfg.jump_probability {
                    unit.sample(&mut self.rng) * cfg.volatility * price * cfg.jump_scale
                } else {
                    0.0
                };
                price = (price + mean_rev + shock + jump).max(0.01);
            }

            let spread = (cfg.spread_mean + unit.sample(&mut self.rng) * cfg.spread_std).max(0.0001);
            let high = price * (1.0 + self.rng.gen_range(0.0..0.005));
            let low = price * (1.0 - self.rng.gen_range(0.0..0.005));
            let volume = volume_dist.sample(&mut self.rng);

            records.push(RawTick {
                timestamp: RawTimestamp::Millis(cfg.start_ts_ms + i as i64 * cfg.interval_ms),
                mid_price: Some(price),
                low: Some(low),
                high: Some(high),
                volume: Some(volume),
                spread: Some(spread),
                volatility: None,
                returns: None,
            });
        }

        records
    }

    /// Generate a normalised tick series.
    pub fn generate(&mut self) -> Result<TickSeries> {
        let window = self.config.volatility_window;
        TickSeries::from_raw(self.generate_raw(), window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_series() {
        let config = SyntheticMarketConfig {
            n_periods: 200,
            ..Default::default()
        };
        let a = SyntheticMarket::new(config.clone()).unwrap().generate().unwrap();
        let b = SyntheticMarket::new(config).unwrap().generate().unwrap();
        assert_eq!(a.ticks(), b.ticks());
    }

    #[test]
    fn test_series_shape() {
        let mut market = SyntheticMarket::new(SyntheticMarketConfig {
            n_periods: 300,
            seed: 7,
            ..Default::default()
        })
        .unwrap();
        let series = market.generate().unwrap();

        assert_eq!(series.len(), 300);
        for tick in series.ticks() {
            assert!(tick.mid_price > 0.0);
            assert!(tick.low.unwrap() <= tick.mid_price);
            assert!(tick.high.unwrap() >= tick.mid_price);
            assert!(tick.spread.unwrap() >= 0.0001);
            assert!(tick.volatility >= 0.0);
        }
        assert!(series.ticks().windows(2).all(|w| w[0].ts_ms < w[1].ts_ms));
    }

    #[test]
    fn test_rejects_bad_config() {
        let config = SyntheticMarketConfig {
            initial_price: 0.0,
            ..Default::default()
        };
        assert!(SyntheticMarket::new(config).is_err());
    }
}
