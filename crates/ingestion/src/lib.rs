//! Market-data ingestion and normalisation for the market-making simulator.
//!
//! This crate handles:
//! - Raw record parsing (epoch-millisecond or RFC 3339 timestamps)
//! - Mid price, return and volatility derivation with default fills
//! - Timestamp ordering validation
//! - Seeded synthetic market generation

pub mod series;
pub mod synthetic;

pub use series::{FillStats, RawTick, RawTimestamp, TickSeries, DEFAULT_VOLATILITY};
pub use synthetic::{SyntheticMarket, SyntheticMarketConfig};
