//! Stochastic fill model.
//!
//! Each quoted side fills with a probability that decays with its distance
//! from mid and rises when the quote sits inside the tick's low/high range.
//! All randomness comes from one per-run `StdRng` stream.

use mmsim_core::{Quote, RunConfig, Tick};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::risk_overlay::RiskOverlayDecision;

/// Fill probability for a quote at or through mid.
pub const CROSSING_FILL_PROB: f64 = 0.95;
/// Probability floor far from mid.
pub const BASE_FILL_PROB: f64 = 0.05;
/// Weight of the distance-decay term.
pub const DECAY_FILL_WEIGHT: f64 = 0.55;
/// Bonus when the quote is reached by the tick's range.
pub const TOUCH_BONUS: f64 = 0.25;
/// Clamp on non-crossing fill probabilities.
pub const FILL_PROB_BOUNDS: (f64, f64) = (0.01, 0.95);

/// Quote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteSide {
    /// Resting buy.
    Bid,
    /// Resting sell.
    Ask,
}

/// Which sides filled this step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fills {
    /// Bid filled (we buy).
    pub bid_filled: bool,
    /// Ask filled (we sell).
    pub ask_filled: bool,
}

impl Fills {
    /// Whether either side filled.
    pub fn any(&self) -> bool {
        self.bid_filled || self.ask_filled
    }

    /// Drop fills vetoed by the inventory limit or adverse-move blocks.
    pub fn apply_vetoes(mut self, decision: &RiskOverlayDecision, inventory: f64) -> Self {
        if inventory >= decision.effective_soft_limit || decision.adverse_buy_block {
            self.bid_filled = false;
        }
        if inventory <= -decision.effective_soft_limit
            || (decision.adverse_sell_block && inventory <= 0.0)
        {
            self.ask_filled = false;
        }
        self
    }
}

/// Net edge in bps of a quote after round-trip fees.
pub fn net_edge_bps(quote: &Quote, mid_price: f64, fee_rate: f64) -> f64 {
    let gross = if mid_price > 0.0 {
        ((quote.ask_px - quote.bid_px) / mid_price).max(0.0)
    } else {
        0.0
    };
    (gross - 2.0 * fee_rate) * 10_000.0
}

/// Seeded execution simulator.
#[derive(Debug, Clone)]
pub struct ExecutionSimulator {
    rng: StdRng,
    sensitivity: f64,
    fee_rate: f64,
}

impl ExecutionSimulator {
    /// Create a simulator seeded from `config.random_seed`.
    pub fn new(config: &RunConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.random_seed),
            sensitivity: config.execution_sensitivity.max(1.0),
            fee_rate: config.transaction_fee,
        }
    }

    /// Whether the quote clears the minimum edge.
    ///
    /// A non-positive minimum disables the check.
    pub fn edge_allows(&self, quote: &Quote, mid_price: f64, min_edge_bps: f64) -> bool {
        min_edge_bps <= 0.0 || net_edge_bps(quote, mid_price, self.fee_rate) >= min_edge_bps
    }

    /// Fill probability of one side.
    pub fn execution_probability(&self, side: QuoteSide, price: f64, tick: &Tick) -> f64 {
        let mid = tick.mid_price;
        if !(mid > 0.0) {
            return 0.0;
        }
        let (distance_bps, touched) = match side {
            QuoteSide::Bid => {
                if price >= mid {
                    return CROSSING_FILL_PROB;
                }
                ((mid - price) / mid * 10_000.0, price >= tick.low_or_default())
            }
            QuoteSide::Ask => {
                if price <= mid {
                    return CROSSING_FILL_PROB;
                }
                ((price - mid) / mid * 10_000.0, price <= tick.high_or_default())
            }
        };
        let decay = (-distance_bps.max(0.0) / self.sensitivity).exp();
        let bonus = if touched { TOUCH_BONUS } else { 0.0 };
        let (lo, hi) = FILL_PROB_BOUNDS;
        (BASE_FILL_PROB + DECAY_FILL_WEIGHT * decay + bonus).clamp(lo, hi)
    }

    /// Draw fills for both sides.
    ///
    /// Consumes two draws, plus a coin flip when both sides fill while flat.
    /// When both fill with open inventory, the side adding exposure is dropped.
    pub fn simulate_executions(&mut self, quote: &Quote, tick: &Tick, inventory: f64) -> Fills {
        let bid_prob = self.execution_probability(QuoteSide::Bid, quote.bid_px, tick);
        let ask_prob = self.execution_probability(QuoteSide::Ask, quote.ask_px, tick);

        let mut fills = Fills {
            bid_filled: self.rng.gen::<f64>() < bid_prob,
            ask_filled: self.rng.gen::<f64>() < ask_prob,
        };

        if fills.bid_filled && fills.ask_filled {
            if inventory > 0.0 {
                fills.bid_filled = false;
            } else if inventory < 0.0 {
                fills.ask_filled = false;
            } else if self.rng.gen::<f64>() < 0.5 {
                fills.ask_filled = false;
            } else {
                fills.bid_filled = false;
            }
        }
        fills
    }
}
