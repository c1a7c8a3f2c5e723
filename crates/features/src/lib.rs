//! Feature computation for the market-making simulator.
//!
//! This crate handles:
//! - Rolling volatility of returns
//! - Market signals (trend, momentum, mean reversion, spread/volume percentiles)
//! - Short-term move prediction

pub mod volatility;
pub mod signals;
pub mod engine;

pub use volatility::RollingVolatility;
pub use signals::{calculate_signals, percentile_rank, predict_short_term_move, simple_returns};
pub use engine::{FeatureEngine, FeatureEngineConfig};
