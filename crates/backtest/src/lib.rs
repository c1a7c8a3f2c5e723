//! Backtesting engine for the market-making simulator.
//!
//! This crate provides:
//! - Avellaneda-Stoikov quoting behind the `QuoteModel` trait
//! - Drawdown-driven risk overlay
//! - Seeded stochastic fill simulation
//! - Capital/inventory ledger and performance metrics
//! - Parallel sweeps and SQLite result storage

pub mod quote_model;
pub mod risk_overlay;
pub mod execution;
pub mod ledger;
pub mod metrics;
pub mod engine;
pub mod sweep;
pub mod store;

pub use quote_model::{AvellanedaStoikov, HorizonClock, QuoteModel, QuoteState};
pub use risk_overlay::{OverlayInput, RiskOverlayDecision, RiskOverlayEngine};
pub use execution::{ExecutionSimulator, Fills, QuoteSide};
pub use ledger::{Ledger, OrderSizing};
pub use metrics::{BacktestMetrics, MetricsCalculator};
pub use engine::{BacktestEngine, BacktestResult};
pub use store::ResultStore;
