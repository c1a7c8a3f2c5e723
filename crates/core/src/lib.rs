//! Core types and configuration for the market-making simulator.
//!
//! This crate provides shared types used across all other crates:
//! - Market data and ledger types (ticks, quotes, trades, snapshots)
//! - Validated configuration structures
//! - Common error types
//! - Tracing bootstrap

pub mod config;
pub mod error;
pub mod telemetry;
pub mod types;

pub use config::{Config, ModelConfig, RunConfig, SpreadConstraint, TimeSource, WinRateMethod};
pub use error::{Error, Result};
pub use types::*;
