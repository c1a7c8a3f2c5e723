//! Configuration structures for the market-making simulator.
//!
//! Every recognised model and run option lives here with its default.
//! `Config::validate` checks all legal ranges once, before a run starts.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Quote model configuration.
    pub model: ModelConfig,
    /// Backtest run configuration.
    pub run: RunConfig,
}

impl Config {
    /// Parse a configuration from a JSON string and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Validate every parameter range.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.run.validate()
    }
}

/// Source of the time-remaining fraction used by the quote model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
    /// Fraction of steps remaining in the series.
    #[default]
    StepRatio,
    /// Simulated days elapsed since the first tick, against `time_horizon`.
    SimulatedTime,
}

/// Quote model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Risk aversion (gamma).
    pub risk_aversion: f64,
    /// Trading horizon in days.
    pub time_horizon: f64,
    /// Initial volatility estimate (replaced by tick volatility each step).
    pub volatility: f64,
    /// How the engine derives the time-remaining fraction.
    pub time_source: TimeSource,
    /// Compute market signals and feed them to the model each step.
    pub use_market_features: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            risk_aversion: 1.0,
            time_horizon: 1.0,
            volatility: 0.01,
            time_source: TimeSource::StepRatio,
            use_market_features: false,
        }
    }
}

impl ModelConfig {
    /// Validate model parameters.
    pub fn validate(&self) -> Result<()> {
        positive("risk_aversion", self.risk_aversion)?;
        positive("time_horizon", self.time_horizon)?;
        non_negative("volatility", self.volatility)
    }
}

/// Minimum quoted spread requested from the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadConstraint {
    /// No minimum spread.
    #[default]
    None,
    /// Minimum spread in price units.
    Absolute(f64),
    /// Minimum spread in basis points of mid; scaled by the risk overlay.
    Bps(f64),
}

/// How SELL trades are matched against BUY trades for the win rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinRateMethod {
    /// Lot queue: each SELL consumes the oldest open BUY lots.
    #[default]
    Fifo,
    /// Approximation: each SELL is compared to the most recent prior BUY.
    LastBuy,
}

/// Backtest run parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Starting capital.
    pub initial_capital: f64,
    /// Fee per fill as a fraction of notional.
    pub transaction_fee: f64,
    /// Seed for the execution RNG.
    pub random_seed: u64,
    /// Minimum net edge in bps required before quoting is actionable.
    pub min_edge_bps: f64,
    /// Steps to wait after a fill before the next one.
    pub cooldown_steps: u32,
    /// Distance decay (bps) of the fill probability.
    pub execution_sensitivity: f64,
    /// Maximum inventory in multiples of the base order size.
    pub max_inventory: u32,
    /// Rolling window for derived volatility.
    pub volatility_window: usize,
    /// Minimum spread requested from the model.
    pub spread_constraint: SpreadConstraint,
    /// Soft inventory limit as a fraction of `max_inventory`.
    pub inventory_soft_limit_ratio: f64,
    /// Volatility at which spread scaling starts (0 disables).
    pub target_volatility: f64,
    /// Spread widening per unit of excess volatility ratio.
    pub vol_spread_scale: f64,
    /// Drawdown at which risk-off mode is entered.
    pub soft_drawdown_risk_pct: f64,
    /// Drawdown at which the run is stopped.
    pub hard_drawdown_stop_pct: f64,
    /// Tick return (bps) that blocks fills against the move (0 disables).
    pub adverse_return_bps: f64,
    /// Soft limit multiplier while risk-off.
    pub risk_off_inventory_scale: f64,
    /// Base order notional as a fraction of initial capital.
    pub order_notional_pct: f64,
    /// Smallest executable order quantity.
    pub min_order_qty: f64,
    /// Largest base order quantity.
    pub max_order_qty: f64,
    /// Win-rate matching method.
    pub win_rate_method: WinRateMethod,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            transaction_fee: 0.001,
            random_seed: 42,
            min_edge_bps: 0.0,
            cooldown_steps: 1,
            execution_sensitivity: 120.0,
            max_inventory: 100,
            volatility_window: 20,
            spread_constraint: SpreadConstraint::None,
            inventory_soft_limit_ratio: 0.8,
            target_volatility: 0.0,
            vol_spread_scale: 0.0,
            soft_drawdown_risk_pct: 1.0,
            hard_drawdown_stop_pct: 1.0,
            adverse_return_bps: 0.0,
            risk_off_inventory_scale: 0.5,
            order_notional_pct: 0.02,
            min_order_qty: 0.0001,
            max_order_qty: 10.0,
            win_rate_method: WinRateMethod::Fifo,
        }
    }
}

impl RunConfig {
    /// Validate run parameters.
    pub fn validate(&self) -> Result<()> {
        positive("initial_capital", self.initial_capital)?;
        non_negative("transaction_fee", self.transaction_fee)?;
        non_negative("min_edge_bps", self.min_edge_bps)?;
        if !(self.execution_sensitivity >= 1.0) {
            return Err(Error::config(format!(
                "execution_sensitivity must be >= 1, got {}",
                self.execution_sensitivity
            )));
        }
        if self.max_inventory == 0 {
            return Err(Error::config("max_inventory must be >= 1"));
        }
        if self.volatility_window < 2 {
            return Err(Error::config(format!(
                "volatility_window must be >= 2, got {}",
                self.volatility_window
            )));
        }
        match self.spread_constraint {
            SpreadConstraint::None => {}
            SpreadConstraint::Absolute(v) => non_negative("spread_constraint", v)?,
            SpreadConstraint::Bps(v) => non_negative("spread_constraint_bps", v)?,
        }
        let ratio = self.inventory_soft_limit_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(Error::config(format!(
                "inventory_soft_limit_ratio must be in (0, 1), got {ratio}"
            )));
        }
        non_negative("target_volatility", self.target_volatility)?;
        non_negative("vol_spread_scale", self.vol_spread_scale)?;
        in_range("soft_drawdown_risk_pct", self.soft_drawdown_risk_pct, 0.0, 1.0)?;
        in_range("hard_drawdown_stop_pct", self.hard_drawdown_stop_pct, 0.0, 1.0)?;
        non_negative("adverse_return_bps", self.adverse_return_bps)?;
        in_range("risk_off_inventory_scale", self.risk_off_inventory_scale, 0.1, 1.0)?;
        in_range("order_notional_pct", self.order_notional_pct, 0.001, 0.5)?;
        positive("min_order_qty", self.min_order_qty)?;
        if !(self.max_order_qty >= self.min_order_qty) || !self.max_order_qty.is_finite() {
            return Err(Error::config(format!(
                "max_order_qty ({}) must be >= min_order_qty ({})",
                self.max_order_qty, self.min_order_qty
            )));
        }
        Ok(())
    }

    /// Spread constraint in basis points, if configured that way.
    pub fn spread_constraint_bps(&self) -> Option<f64> {
        match self.spread_constraint {
            SpreadConstraint::Bps(bps) => Some(bps),
            _ => None,
        }
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::config(format!("{name} must be > 0, got {value}")))
    }
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::config(format!("{name} must be >= 0, got {value}")))
    }
}

fn in_range(name: &str, value: f64, lo: f64, hi: f64) -> Result<()> {
    if value.is_finite() && (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(Error::config(format!(
            "{name} must be in [{lo}, {hi}], got {value}"
        )))
    }
}
