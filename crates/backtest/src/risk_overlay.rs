//! Per-step drawdown state machine.
//!
//! Tracks the running portfolio peak and derives, for each step, the
//! effective spread constraint, minimum edge and inventory limit, plus the
//! risk-off and hard-stop flags.

use mmsim_core::{RunConfig, SpreadConstraint};
use tracing::debug;

/// Minimum-edge surcharge (bps) while risk-off.
pub const RISK_OFF_EDGE_BPS: f64 = 0.5;
/// Spread constraint multiplier while risk-off.
pub const RISK_OFF_SPREAD_MULT: f64 = 1.25;
/// Bounds on the volatility ratio used for spread scaling.
pub const VOL_RATIO_BOUNDS: (f64, f64) = (0.5, 5.0);

/// Inputs observed at one step.
#[derive(Debug, Clone, Copy)]
pub struct OverlayInput {
    /// Tick mid price.
    pub mid_price: f64,
    /// Tick volatility.
    pub volatility: f64,
    /// Tick return (fraction).
    pub tick_return: f64,
    /// Portfolio value at mid before trading this step.
    pub current_value: f64,
    /// Soft inventory limit before risk-off scaling.
    pub soft_limit: f64,
}

/// Overlay output, recomputed every step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskOverlayDecision {
    /// Running peak portfolio value.
    pub peak_value: f64,
    /// Portfolio value this step.
    pub current_value: f64,
    /// Decline from peak, in [0, 1].
    pub drawdown_pct: f64,
    /// Drawdown reached the hard stop.
    pub hard_stop_triggered: bool,
    /// Drawdown reached the soft threshold.
    pub risk_off: bool,
    /// Minimum full spread in price units handed to the model.
    pub effective_spread_constraint: Option<f64>,
    /// Minimum net edge (bps) for a fill to be actionable.
    pub effective_min_edge_bps: f64,
    /// Inventory at which the adding side is vetoed.
    pub effective_soft_limit: f64,
    /// Bid fills vetoed after an adverse down move.
    pub adverse_buy_block: bool,
    /// Ask fills vetoed after an adverse up move.
    pub adverse_sell_block: bool,
}

/// Drawdown-driven risk overlay.
#[derive(Debug, Clone)]
pub struct RiskOverlayEngine {
    peak_value: f64,
    soft_drawdown: f64,
    hard_drawdown: f64,
    risk_off_inventory_scale: f64,
    min_edge_bps: f64,
    spread_constraint: SpreadConstraint,
    target_volatility: f64,
    vol_spread_scale: f64,
    adverse_return_bps: f64,
}

impl RiskOverlayEngine {
    /// Create an overlay seeded with the initial capital as peak.
    pub fn new(config: &RunConfig) -> Self {
        Self {
            peak_value: config.initial_capital,
            soft_drawdown: config.soft_drawdown_risk_pct.clamp(0.0, 1.0),
            hard_drawdown: config.hard_drawdown_stop_pct.clamp(0.0, 1.0),
            risk_off_inventory_scale: config.risk_off_inventory_scale.clamp(0.1, 1.0),
            min_edge_bps: config.min_edge_bps.max(0.0),
            spread_constraint: config.spread_constraint,
            target_volatility: config.target_volatility.max(0.0),
            vol_spread_scale: config.vol_spread_scale.max(0.0),
            adverse_return_bps: config.adverse_return_bps.max(0.0),
        }
    }

    /// Running peak value.
    pub fn peak_value(&self) -> f64 {
        self.peak_value
    }

    /// Update the peak and derive this step's decision.
    pub fn evaluate(&mut self, input: &OverlayInput) -> RiskOverlayDecision {
        if input.current_value.is_finite() {
            self.peak_value = self.peak_value.max(input.current_value);
        }
        let drawdown_pct =
            ((self.peak_value - input.current_value) / self.peak_value.max(1e-9)).clamp(0.0, 1.0);

        let hard_stop_triggered = drawdown_pct >= self.hard_drawdown;
        let risk_off = drawdown_pct >= self.soft_drawdown;

        let effective_spread_constraint =
            self.spread_constraint(input.mid_price, input.volatility, risk_off);

        let effective_min_edge_bps = if risk_off {
            self.min_edge_bps + RISK_OFF_EDGE_BPS
        } else {
            self.min_edge_bps
        };

        let scale = if risk_off {
            self.risk_off_inventory_scale
        } else {
            1.0
        };
        let effective_soft_limit = (input.soft_limit * scale).max(1e-9);

        let (adverse_buy_block, adverse_sell_block) = if self.adverse_return_bps > 0.0 {
            let threshold = self.adverse_return_bps / 10_000.0;
            (input.tick_return <= -threshold, input.tick_return >= threshold)
        } else {
            (false, false)
        };

        let decision = RiskOverlayDecision {
            peak_value: self.peak_value,
            current_value: input.current_value,
            drawdown_pct,
            hard_stop_triggered,
            risk_off,
            effective_spread_constraint,
            effective_min_edge_bps,
            effective_soft_limit,
            adverse_buy_block,
            adverse_sell_block,
        };
        debug!(
            drawdown_pct,
            risk_off,
            hard_stop = hard_stop_triggered,
            "risk overlay"
        );
        decision
    }

    fn spread_constraint(&self, mid_price: f64, volatility: f64, risk_off: bool) -> Option<f64> {
        match self.spread_constraint {
            SpreadConstraint::None => None,
            SpreadConstraint::Absolute(c) => Some(c),
            SpreadConstraint::Bps(bps) => {
                let mut bps = bps;
                if self.target_volatility > 0.0 && volatility > 0.0 {
                    let (lo, hi) = VOL_RATIO_BOUNDS;
                    let vol_ratio = (volatility / self.target_volatility).clamp(lo, hi);
                    bps *= 1.0 + self.vol_spread_scale * (vol_ratio - 1.0).max(0.0);
                }
                if risk_off {
                    bps *= RISK_OFF_SPREAD_MULT;
                }
                Some(mid_price * bps / 10_000.0)
            }
        }
    }
}
