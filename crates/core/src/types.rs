//! Core data types for the market-making simulator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp in milliseconds since Unix epoch (UTC).
pub type TimestampMs = i64;

/// Milliseconds in one day.
pub const MS_PER_DAY: f64 = 86_400_000.0;

/// Convert a millisecond timestamp to a UTC datetime.
#[inline]
pub fn ts_to_datetime(ts_ms: TimestampMs) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ts_ms)
}

/// One step of the normalised market-data series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Timestamp in milliseconds (strictly increasing within a series).
    pub ts_ms: TimestampMs,
    /// Reference mid price (> 0).
    pub mid_price: f64,
    /// Period low, if known.
    pub low: Option<f64>,
    /// Period high, if known.
    pub high: Option<f64>,
    /// Traded volume, if known.
    pub volume: Option<f64>,
    /// Quoted relative spread, if known.
    pub spread: Option<f64>,
    /// Per-step volatility estimate (>= 0).
    pub volatility: f64,
    /// Realized return versus the previous tick (0 for the first tick).
    pub returns: f64,
}

impl Tick {
    /// Create a bare tick with default volatility and no range data.
    pub fn new(ts_ms: TimestampMs, mid_price: f64) -> Self {
        Self {
            ts_ms,
            mid_price,
            low: None,
            high: None,
            volume: None,
            spread: None,
            volatility: 0.01,
            returns: 0.0,
        }
    }

    /// Set the low/high range.
    pub fn with_range(mut self, low: f64, high: f64) -> Self {
        self.low = Some(low);
        self.high = Some(high);
        self
    }

    /// Set the volatility estimate.
    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility;
        self
    }

    /// Set the realized return.
    pub fn with_returns(mut self, returns: f64) -> Self {
        self.returns = returns;
        self
    }

    /// Low price, defaulting to 0.5% below mid.
    #[inline]
    pub fn low_or_default(&self) -> f64 {
        self.low.unwrap_or(self.mid_price * 0.995)
    }

    /// High price, defaulting to 0.5% above mid.
    #[inline]
    pub fn high_or_default(&self) -> f64 {
        self.high.unwrap_or(self.mid_price * 1.005)
    }

    /// Timestamp as a UTC datetime.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        ts_to_datetime(self.ts_ms)
    }
}

/// A two-sided quote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Bid price.
    pub bid_px: f64,
    /// Ask price.
    pub ask_px: f64,
}

impl Quote {
    /// Create a new quote.
    #[inline]
    pub fn new(bid_px: f64, ask_px: f64) -> Self {
        Self { bid_px, ask_px }
    }

    /// Calculate mid price.
    #[inline]
    pub fn mid(&self) -> f64 {
        (self.bid_px + self.ask_px) / 2.0
    }

    /// Calculate spread.
    #[inline]
    pub fn spread(&self) -> f64 {
        self.ask_px - self.bid_px
    }

    /// Whether both prices are finite and bid < ask.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.bid_px.is_finite() && self.ask_px.is_finite() && self.bid_px < self.ask_px
    }
}

/// Side of a ledger trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeSide {
    /// Bid filled: inventory increases.
    Buy,
    /// Ask filled: inventory decreases.
    Sell,
    /// Forced close of the whole position.
    Liquidation,
}

impl TradeSide {
    /// Upper-case label used in logs and persisted output.
    pub fn as_str(self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
            TradeSide::Liquidation => "LIQUIDATION",
        }
    }

    /// Parse an upper-case label.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            "LIQUIDATION" => Some(TradeSide::Liquidation),
            _ => None,
        }
    }
}

/// An executed trade. Immutable once appended to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Step timestamp.
    pub ts_ms: TimestampMs,
    /// Trade side.
    pub side: TradeSide,
    /// Execution price.
    pub price: f64,
    /// Quantity. For liquidations this is the signed pre-liquidation inventory.
    pub quantity: f64,
    /// Fee paid (>= 0).
    pub fee: f64,
    /// Mid price at the time of the trade.
    pub mid_price: f64,
    /// Inventory after the trade.
    pub inventory: f64,
    /// Capital after the trade.
    pub capital: f64,
}

impl Trade {
    /// Absolute notional of the trade.
    #[inline]
    pub fn notional(&self) -> f64 {
        (self.price * self.quantity).abs()
    }
}

/// Per-step portfolio snapshot.
///
/// `total_value == capital + inventory * mid_price` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Step timestamp.
    pub ts_ms: TimestampMs,
    /// Mid price used for marking.
    pub mid_price: f64,
    /// Inventory at the end of the step.
    pub inventory: f64,
    /// Capital at the end of the step.
    pub capital: f64,
    /// Marked value of the inventory.
    pub unrealized_pnl: f64,
    /// Capital plus marked inventory.
    pub total_value: f64,
}

impl PositionSnapshot {
    /// Build a snapshot, deriving the marked fields.
    pub fn new(ts_ms: TimestampMs, mid_price: f64, inventory: f64, capital: f64) -> Self {
        let unrealized_pnl = inventory * mid_price;
        Self {
            ts_ms,
            mid_price,
            inventory,
            capital,
            unrealized_pnl,
            total_value: capital + unrealized_pnl,
        }
    }
}

/// Optional market signals fed to a quote model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketFeatures {
    /// Recent volatility of returns.
    pub volatility: Option<f64>,
    /// Absolute slope of the moving average relative to price.
    pub trend_strength: Option<f64>,
    /// Price momentum over a short lookback.
    pub momentum: Option<f64>,
    /// (moving average - price) / price.
    pub mean_reversion: Option<f64>,
    /// Most recent spread, if the series carries spreads.
    pub spread: Option<f64>,
    /// Percentile rank of the current spread in the lookback window.
    pub spread_percentile: Option<f64>,
    /// Percentile rank of the current volume in the lookback window.
    pub volume_percentile: Option<f64>,
    /// Short-term move prediction in [-1, 1].
    pub price_move_signal: Option<f64>,
}

impl MarketFeatures {
    /// Whether no signal is populated.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// How a backtest run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// Tick series exhausted.
    Normal,
    /// Hard drawdown stop fired on the given step index.
    HardStop {
        /// Zero-based step at which the run stopped.
        step: usize,
    },
}

impl Termination {
    /// Whether the run ended early on the hard drawdown stop.
    pub fn is_hard_stop(&self) -> bool {
        matches!(self, Termination::HardStop { .. })
    }
}
