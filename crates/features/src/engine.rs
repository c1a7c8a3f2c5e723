//! Feature computation engine.
//!
//! Keeps a rolling window of ticks and produces market signals once enough
//! history has accumulated.

use crate::signals::{calculate_signals, predict_short_term_move};
use mmsim_core::{MarketFeatures, Tick};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Feature engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureEngineConfig {
    /// Ticks of history required before signals are produced.
    pub warmup: usize,
    /// Maximum lookback for the signal calculation.
    pub max_lookback: usize,
    /// Prices used for the short-term move prediction.
    pub move_window: usize,
}

impl Default for FeatureEngineConfig {
    fn default() -> Self {
        Self {
            warmup: 100,
            max_lookback: 50,
            move_window: 20,
        }
    }
}

/// Feature computation engine.
pub struct FeatureEngine {
    config: FeatureEngineConfig,
    /// Most recent ticks, including the current one.
    window: VecDeque<Tick>,
    /// Number of ticks seen.
    steps: usize,
}

impl FeatureEngine {
    /// Create a new feature engine.
    pub fn new(config: FeatureEngineConfig) -> Self {
        let capacity = config.warmup + 1;
        Self {
            config,
            window: VecDeque::with_capacity(capacity),
            steps: 0,
        }
    }

    /// Process the next tick.
    ///
    /// Returns `None` during warmup.
    pub fn update(&mut self, tick: &Tick) -> Option<MarketFeatures> {
        let index = self.steps;
        self.steps += 1;

        self.window.push_back(tick.clone());
        while self.window.len() > self.config.warmup + 1 {
            self.window.pop_front();
        }

        if index < self.config.warmup {
            return None;
        }

        let ticks = self.window.make_contiguous();
        let lookback = self.config.max_lookback.min(index);
        let mut features = calculate_signals(ticks, lookback)?;

        let move_start = ticks.len().saturating_sub(self.config.move_window);
        let prices: Vec<f64> = ticks[move_start..].iter().map(|t| t.mid_price).collect();
        features.price_move_signal = Some(predict_short_term_move(&prices));

        debug!(step = index, ?features, "market features");
        Some(features)
    }

    /// Number of ticks processed.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Clear all state.
    pub fn reset(&mut self) {
        self.window.clear();
        self.steps = 0;
    }
}

impl Default for FeatureEngine {
    fn default() -> Self {
        Self::new(FeatureEngineConfig::default())
    }
}
