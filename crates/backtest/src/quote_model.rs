//! Avellaneda-Stoikov quoting model.
//!
//! Reservation price:
//! ```text
//! r = s - q * gamma * sigma^2 * tau        (inventory term capped at 0.5% of s)
//! ```
//! Optimal half-spread:
//! ```text
//! h = (gamma * sigma^2 * tau + (2 / gamma) * ln(1 + gamma / 2)) / 2
//! ```
//! where `tau` is the fraction of the trading horizon remaining. The caller
//! supplies `tau` each step via [`HorizonClock`]; the model never reads the
//! system clock on its own.

use chrono::{DateTime, Utc};
use mmsim_core::{
    Error, MarketFeatures, ModelConfig, Quote, Result, TimeSource, TimestampMs, MS_PER_DAY,
};
use tracing::{debug, warn};

/// Cap on the inventory term and on the half-spread, as a fraction of mid.
pub const MAX_SKEW_FRAC: f64 = 0.005;
/// Final quotes stay within this fraction of mid.
pub const MAX_QUOTE_DISTANCE_FRAC: f64 = 0.01;
/// Bound on each market-feature reservation adjustment, as a fraction of mid.
pub const MAX_FEATURE_ADJ_FRAC: f64 = 0.0015;
/// Half-spread used when the formula faults and no constraint is given.
pub const FALLBACK_HALF_SPREAD_FRAC: f64 = 0.005;
/// Half-spread used once the horizon is exhausted and no constraint is given.
pub const TERMINAL_HALF_SPREAD_FRAC: f64 = 0.001;

/// Common interface for quoting models driven by the backtest engine.
pub trait QuoteModel: Send {
    /// Model name for logs and stored results.
    fn name(&self) -> &'static str;

    /// Apply a full set of model parameters.
    fn set_parameters(&mut self, config: &ModelConfig) -> Result<()>;

    /// Push the current signed inventory.
    fn update_inventory(&mut self, inventory: f64);

    /// Push the current volatility estimate.
    fn set_volatility(&mut self, volatility: f64);

    /// Push optional market signals for the current step.
    fn set_market_features(&mut self, features: Option<MarketFeatures>);

    /// Push the fraction of the horizon remaining, in [0, 1].
    fn set_time_remaining(&mut self, fraction: f64);

    /// Compute a bid/ask pair with bid < ask.
    ///
    /// `spread_constraint` is a minimum full spread in price units.
    fn calculate_optimal_quotes(&self, mid_price: f64, spread_constraint: Option<f64>) -> Quote;
}

/// Source of the time-remaining fraction.
#[derive(Debug, Clone, PartialEq)]
pub enum HorizonClock {
    /// 1 - step / total_steps.
    StepRatio {
        /// Number of steps in the run.
        total_steps: usize,
    },
    /// Simulated days elapsed since the first tick against the horizon.
    SimulatedTime {
        /// Timestamp of the first tick.
        start_ts_ms: TimestampMs,
        /// Horizon length in days.
        horizon_days: f64,
    },
    /// Real elapsed time against the horizon. Not reproducible; live use only.
    WallClock {
        /// When the clock was started.
        started_at: DateTime<Utc>,
        /// Horizon length in days.
        horizon_days: f64,
    },
}

impl HorizonClock {
    /// Clock for a backtest over `total_steps` ticks starting at `start_ts_ms`.
    pub fn for_backtest(
        source: TimeSource,
        horizon_days: f64,
        start_ts_ms: TimestampMs,
        total_steps: usize,
    ) -> Self {
        match source {
            TimeSource::StepRatio => HorizonClock::StepRatio { total_steps },
            TimeSource::SimulatedTime => HorizonClock::SimulatedTime {
                start_ts_ms,
                horizon_days,
            },
        }
    }

    /// Wall-clock horizon starting now.
    pub fn wall_clock(horizon_days: f64) -> Self {
        HorizonClock::WallClock {
            started_at: Utc::now(),
            horizon_days,
        }
    }

    /// Fraction of the horizon remaining at `step` / `ts_ms`.
    pub fn fraction_remaining(&self, step: usize, ts_ms: TimestampMs) -> f64 {
        match *self {
            HorizonClock::StepRatio { total_steps } => {
                if total_steps == 0 {
                    0.0
                } else {
                    (1.0 - step as f64 / total_steps as f64).clamp(0.0, 1.0)
                }
            }
            HorizonClock::SimulatedTime {
                start_ts_ms,
                horizon_days,
            } => {
                let elapsed_days = (ts_ms - start_ts_ms) as f64 / MS_PER_DAY;
                remaining_fraction(horizon_days, elapsed_days)
            }
            HorizonClock::WallClock {
                started_at,
                horizon_days,
            } => {
                let elapsed_ms = (Utc::now() - started_at).num_milliseconds();
                remaining_fraction(horizon_days, elapsed_ms as f64 / MS_PER_DAY)
            }
        }
    }
}

fn remaining_fraction(horizon_days: f64, elapsed_days: f64) -> f64 {
    if horizon_days > 0.0 {
        ((horizon_days - elapsed_days).max(0.0) / horizon_days).min(1.0)
    } else {
        0.0
    }
}

/// Mutable model state.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteState {
    /// Risk aversion (gamma > 0).
    pub risk_aversion: f64,
    /// Horizon in days (> 0).
    pub time_horizon: f64,
    /// Volatility (sigma >= 0).
    pub volatility: f64,
    /// Signed inventory.
    pub current_inventory: f64,
    /// Fraction of the horizon remaining.
    pub time_remaining: f64,
    /// Optional market signals.
    pub market_features: Option<MarketFeatures>,
}

/// The Avellaneda-Stoikov quote model.
#[derive(Debug, Clone)]
pub struct AvellanedaStoikov {
    state: QuoteState,
}

impl AvellanedaStoikov {
    /// Create a model from validated parameters.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: QuoteState {
                risk_aversion: config.risk_aversion,
                time_horizon: config.time_horizon,
                volatility: config.volatility,
                current_inventory: 0.0,
                time_remaining: 1.0,
                market_features: None,
            },
        })
    }

    /// Current state.
    pub fn state(&self) -> &QuoteState {
        &self.state
    }

    /// Inventory-risk-adjusted fair price, before market-feature shifts.
    pub fn reservation_price(&self, mid_price: f64) -> f64 {
        let s = &self.state;
        if s.time_remaining <= 0.0 {
            return mid_price;
        }
        let cap = MAX_SKEW_FRAC * mid_price;
        let inventory_risk = (s.risk_aversion
            * s.volatility.powi(2)
            * s.current_inventory
            * s.time_remaining)
            .clamp(-cap, cap);
        mid_price - inventory_risk
    }

    /// Uncapped optimal half-spread.
    pub fn optimal_half_spread(&self) -> f64 {
        let s = &self.state;
        let gamma = s.risk_aversion;
        (gamma * s.volatility.powi(2) * s.time_remaining + (2.0 / gamma) * (1.0 + gamma / 2.0).ln())
            / 2.0
    }

    /// Expected P&L of a quote pair over `time_period` given side arrival rates.
    pub fn expected_pnl(
        &self,
        mid_price: f64,
        bid_price: f64,
        ask_price: f64,
        arrival_rate_bid: f64,
        arrival_rate_ask: f64,
        time_period: f64,
    ) -> f64 {
        let s = &self.state;
        let bid_distance = mid_price - bid_price;
        let ask_distance = ask_price - mid_price;
        let prob_bid = arrival_rate_bid * time_period * (-s.risk_aversion * bid_distance).exp();
        let prob_ask = arrival_rate_ask * time_period * (-s.risk_aversion * ask_distance).exp();
        let inventory_cost = 0.5
            * s.risk_aversion
            * s.volatility.powi(2)
            * s.current_inventory.powi(2)
            * time_period;
        prob_bid * bid_distance + prob_ask * ask_distance - inventory_cost
    }

    /// Quote computation that reports numeric faults instead of recovering.
    pub fn try_quotes(&self, mid_price: f64, spread_constraint: Option<f64>) -> Result<Quote> {
        if !(mid_price.is_finite() && mid_price > 0.0) {
            return Err(Error::numeric(format!("invalid mid price {mid_price}")));
        }
        let constraint = spread_constraint.filter(|c| *c > 0.0);

        if self.state.time_remaining <= 0.0 {
            let half = match constraint {
                Some(c) => c / 2.0,
                None => TERMINAL_HALF_SPREAD_FRAC * mid_price,
            };
            return Ok(Quote::new(mid_price - half, mid_price + half));
        }

        let (feature_shift, spread_multiplier) = self.feature_adjustments(mid_price);
        let reservation = self.reservation_price(mid_price) + feature_shift;
        let raw_half_spread = self.optimal_half_spread();
        // f64::min/max swallow NaN, so check before capping.
        if !(reservation.is_finite() && raw_half_spread.is_finite()) {
            return Err(Error::numeric(format!(
                "non-finite quote inputs (reservation={reservation}, half_spread={raw_half_spread})"
            )));
        }

        let mut half_spread = raw_half_spread.min(MAX_SKEW_FRAC * mid_price);
        half_spread *= spread_multiplier;
        if let Some(c) = constraint {
            half_spread = half_spread.max(c / 2.0);
        }

        let bid = (reservation - half_spread).max(mid_price * (1.0 - MAX_QUOTE_DISTANCE_FRAC));
        let ask = (reservation + half_spread).min(mid_price * (1.0 + MAX_QUOTE_DISTANCE_FRAC));
        let quote = Quote::new(bid, ask);

        if !quote.is_valid() {
            return Err(Error::numeric(format!(
                "degenerate quote bid={bid} ask={ask} (reservation={reservation}, half_spread={half_spread})"
            )));
        }

        debug!(
            mid_price,
            reservation,
            bid = quote.bid_px,
            ask = quote.ask_px,
            "optimal quotes"
        );
        Ok(quote)
    }

    /// Fixed spread around mid used when the formula faults.
    pub fn fallback_quote(mid_price: f64, spread_constraint: Option<f64>) -> Quote {
        match spread_constraint.filter(|c| *c > 0.0 && c.is_finite()) {
            Some(c) => Quote::new(mid_price - c / 2.0, mid_price + c / 2.0),
            None => Quote::new(
                mid_price * (1.0 - FALLBACK_HALF_SPREAD_FRAC),
                mid_price * (1.0 + FALLBACK_HALF_SPREAD_FRAC),
            ),
        }
    }

    /// Additive reservation shift and multiplicative half-spread factor.
    fn feature_adjustments(&self, mid_price: f64) -> (f64, f64) {
        let Some(features) = &self.state.market_features else {
            return (0.0, 1.0);
        };
        let bound = |frac: f64| frac.clamp(-MAX_FEATURE_ADJ_FRAC, MAX_FEATURE_ADJ_FRAC) * mid_price;
        let mut shift = 0.0;

        if let (Some(trend), Some(momentum)) = (features.trend_strength, features.momentum) {
            if momentum.abs() > 0.002 && trend > 0.001 {
                shift += bound(momentum.signum() * momentum.abs().min(MAX_FEATURE_ADJ_FRAC));
            }
        }

        if let Some(mean_rev) = features.mean_reversion {
            if mean_rev.abs() > 0.005 {
                shift += bound(mean_rev.signum() * (mean_rev.abs() / 10.0));
            }
        }

        if let Some(signal) = features.price_move_signal {
            shift += bound(signal.clamp(-1.0, 1.0) * 0.0005);
        }

        let multiplier = features
            .spread_percentile
            .filter(|p| p.is_finite())
            .map(|p| (1.0 + 0.4 * (p - 0.5)).clamp(0.8, 1.2))
            .unwrap_or(1.0);

        if shift.is_finite() {
            (shift, multiplier)
        } else {
            (0.0, multiplier)
        }
    }
}

impl QuoteModel for AvellanedaStoikov {
    fn name(&self) -> &'static str {
        "avellaneda_stoikov"
    }

    fn set_parameters(&mut self, config: &ModelConfig) -> Result<()> {
        config.validate()?;
        self.state.risk_aversion = config.risk_aversion;
        self.state.time_horizon = config.time_horizon;
        self.state.volatility = config.volatility;
        Ok(())
    }

    fn update_inventory(&mut self, inventory: f64) {
        self.state.current_inventory = inventory;
    }

    fn set_volatility(&mut self, volatility: f64) {
        self.state.volatility = volatility;
    }

    fn set_market_features(&mut self, features: Option<MarketFeatures>) {
        self.state.market_features = features;
    }

    fn set_time_remaining(&mut self, fraction: f64) {
        self.state.time_remaining = fraction;
    }

    fn calculate_optimal_quotes(&self, mid_price: f64, spread_constraint: Option<f64>) -> Quote {
        match self.try_quotes(mid_price, spread_constraint) {
            Ok(quote) => quote,
            Err(err) => {
                warn!(%err, mid_price, "quote formula faulted; using fallback spread");
                Self::fallback_quote(mid_price, spread_constraint)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model() -> AvellanedaStoikov {
        AvellanedaStoikov::new(&ModelConfig {
            risk_aversion: 1.0,
            time_horizon: 1.0,
            volatility: 0.01,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_quotes_are_ordered() {
        let quote = model().calculate_optimal_quotes(2000.0, None);
        assert!(quote.bid_px < quote.ask_px);
    }

    #[test]
    fn test_spread_within_half_percent_cap() {
        let quote = model().calculate_optimal_quotes(2000.0, None);
        assert!(quote.spread() <= 2.0 * 0.005 * 2000.0);
        // Uncapped half-spread (~0.405) is far below the cap.
        assert_relative_eq!(quote.spread(), 2.0 * model().optimal_half_spread(), epsilon = 1e-9);
    }

    #[test]
    fn test_inventory_pushes_reservation_directionally() {
        let mut m = model();
        m.set_volatility(2.0);
        m.update_inventory(20.0);
        let long = m.calculate_optimal_quotes(2000.0, None);
        m.update_inventory(-20.0);
        let short = m.calculate_optimal_quotes(2000.0, None);
        assert!(long.mid() < short.mid());
    }

    #[test]
    fn test_inventory_risk_capped() {
        let mut m = model();
        m.set_volatility(10.0);
        m.update_inventory(1_000.0);
        assert_relative_eq!(m.reservation_price(2000.0), 2000.0 * (1.0 - MAX_SKEW_FRAC));
    }

    #[test]
    fn test_spread_constraint_respected() {
        let quote = model().calculate_optimal_quotes(2000.0, Some(10.0));
        assert!(quote.spread() >= 10.0 - 1e-9);
    }

    #[test]
    fn test_quotes_clamped_to_one_percent() {
        let quote = model().calculate_optimal_quotes(2000.0, Some(100.0));
        assert_relative_eq!(quote.bid_px, 1980.0);
        assert_relative_eq!(quote.ask_px, 2020.0);
    }

    #[test]
    fn test_nan_volatility_falls_back() {
        let mut m = model();
        m.set_volatility(f64::NAN);
        m.update_inventory(5.0);
        assert!(m.try_quotes(2000.0, None).is_err());

        let quote = m.calculate_optimal_quotes(2000.0, None);
        assert_relative_eq!(quote.bid_px, 1990.0);
        assert_relative_eq!(quote.ask_px, 2010.0);

        let quote = m.calculate_optimal_quotes(2000.0, Some(4.0));
        assert_relative_eq!(quote.bid_px, 1998.0);
        assert_relative_eq!(quote.ask_px, 2002.0);
    }

    #[test]
    fn test_exhausted_horizon_uses_terminal_spread() {
        let mut m = model();
        m.update_inventory(50.0);
        m.set_time_remaining(0.0);
        let quote = m.calculate_optimal_quotes(1000.0, None);
        assert_relative_eq!(quote.bid_px, 999.0);
        assert_relative_eq!(quote.ask_px, 1001.0);

        let quote = m.calculate_optimal_quotes(1000.0, Some(3.0));
        assert_relative_eq!(quote.spread(), 3.0);
    }

    #[test]
    fn test_feature_shift_bounded() {
        let mut m = model();
        m.set_market_features(Some(MarketFeatures {
            trend_strength: Some(0.01),
            momentum: Some(0.5),
            mean_reversion: Some(0.5),
            price_move_signal: Some(5.0),
            ..Default::default()
        }));
        let base = model().calculate_optimal_quotes(1000.0, None);
        let shifted = m.calculate_optimal_quotes(1000.0, None);
        let shift = shifted.mid() - base.mid();
        assert!(shift > 0.0);
        // Three adjustments, each at most 0.15% of mid.
        assert!(shift <= 3.0 * MAX_FEATURE_ADJ_FRAC * 1000.0 + 1e-9);
    }

    #[test]
    fn test_spread_percentile_scales_spread() {
        let mut m = model();
        let base = m.calculate_optimal_quotes(1000.0, None).spread();
        m.set_market_features(Some(MarketFeatures {
            spread_percentile: Some(1.0),
            ..Default::default()
        }));
        assert_relative_eq!(m.calculate_optimal_quotes(1000.0, None).spread(), base * 1.2, epsilon = 1e-9);
        m.set_market_features(Some(MarketFeatures {
            spread_percentile: Some(0.0),
            ..Default::default()
        }));
        assert_relative_eq!(m.calculate_optimal_quotes(1000.0, None).spread(), base * 0.8, epsilon = 1e-9);
    }

    #[test]
    fn test_expected_pnl_finite() {
        let m = model();
        let quote = m.calculate_optimal_quotes(2000.0, None);
        let pnl = m.expected_pnl(2000.0, quote.bid_px, quote.ask_px, 1.0, 1.0, 1.0);
        assert!(pnl.is_finite());
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let config = ModelConfig {
            risk_aversion: -1.0,
            ..Default::default()
        };
        assert!(AvellanedaStoikov::new(&config).is_err());
        assert!(model().set_parameters(&config).is_err());
    }

    #[test]
    fn test_step_ratio_clock() {
        let clock = HorizonClock::for_backtest(TimeSource::StepRatio, 1.0, 0, 4);
        assert_relative_eq!(clock.fraction_remaining(0, 0), 1.0);
        assert_relative_eq!(clock.fraction_remaining(3, 0), 0.25);
        assert_relative_eq!(clock.fraction_remaining(9, 0), 0.0);
    }

    #[test]
    fn test_simulated_time_clock() {
        let clock = HorizonClock::for_backtest(TimeSource::SimulatedTime, 2.0, 0, 10);
        let one_day = MS_PER_DAY as i64;
        assert_relative_eq!(clock.fraction_remaining(0, 0), 1.0);
        assert_relative_eq!(clock.fraction_remaining(5, one_day), 0.5);
        assert_relative_eq!(clock.fraction_remaining(9, 3 * one_day), 0.0);
    }

    #[test]
    fn test_wall_clock_starts_full() {
        let clock = HorizonClock::wall_clock(1.0);
        assert!(clock.fraction_remaining(0, 0) > 0.99);
    }
}
