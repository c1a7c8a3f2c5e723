//! Tick-series normalisation.
//!
//! Turns raw market-data records into a validated, ordered series of ticks:
//! mid prices are derived when absent, returns and volatility are filled,
//! and timestamp ordering is enforced before any backtest step runs.

use chrono::DateTime;
use mmsim_core::{Error, Result, Tick, TimestampMs};
use mmsim_features::RollingVolatility;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

/// Volatility used when none is supplied and none can be derived yet.
pub const DEFAULT_VOLATILITY: f64 = 0.01;

/// Timestamp as found in input files: epoch milliseconds or RFC 3339 text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// Milliseconds since Unix epoch.
    Millis(i64),
    /// RFC 3339 datetime string.
    Text(String),
}

impl RawTimestamp {
    /// Resolve to epoch milliseconds.
    pub fn to_millis(&self) -> Result<TimestampMs> {
        match self {
            RawTimestamp::Millis(ms) => Ok(*ms),
            RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.timestamp_millis())
                .map_err(|e| Error::data(format!("invalid timestamp '{text}': {e}"))),
        }
    }
}

/// A market-data record before normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTick {
    /// Record timestamp.
    pub timestamp: RawTimestamp,
    /// Mid price; derived from low/high when absent.
    #[serde(default)]
    pub mid_price: Option<f64>,
    /// Period low.
    #[serde(default)]
    pub low: Option<f64>,
    /// Period high.
    #[serde(default)]
    pub high: Option<f64>,
    /// Traded volume.
    #[serde(default)]
    pub volume: Option<f64>,
    /// Relative quoted spread.
    #[serde(default)]
    pub spread: Option<f64>,
    /// Volatility estimate; derived when absent.
    #[serde(default)]
    pub volatility: Option<f64>,
    /// Realized return; derived when absent.
    #[serde(default)]
    pub returns: Option<f64>,
}

impl RawTick {
    /// Record with only a timestamp and mid price.
    pub fn from_mid(ts_ms: TimestampMs, mid_price: f64) -> Self {
        Self {
            timestamp: RawTimestamp::Millis(ts_ms),
            mid_price: Some(mid_price),
            low: None,
            high: None,
            volume: None,
            spread: None,
            volatility: None,
            returns: None,
        }
    }

    fn resolve_mid(&self) -> Option<f64> {
        match (self.mid_price, self.low, self.high) {
            (Some(mid), _, _) if mid.is_finite() => Some(mid),
            (_, Some(low), Some(high)) if low.is_finite() && high.is_finite() => {
                Some((low + high) / 2.0)
            }
            _ => None,
        }
    }
}

/// Counts of fields filled with defaults during normalisation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillStats {
    /// Ticks whose volatility was derived from the rolling window.
    pub derived_volatility: usize,
    /// Ticks whose volatility fell back to the default.
    pub default_volatility: usize,
    /// Ticks whose supplied return was missing or NaN.
    pub derived_returns: usize,
    /// Optional numeric fields dropped because they were not finite.
    pub dropped_fields: usize,
}

impl FillStats {
    /// Whether any field was filled or dropped.
    pub fn any(&self) -> bool {
        *self != Self::default()
    }
}

/// A validated, strictly time-ordered tick series.
#[derive(Debug, Clone, Default)]
pub struct TickSeries {
    ticks: Vec<Tick>,
    fills: FillStats,
}

impl TickSeries {
    /// Normalise raw records.
    ///
    /// Fails on unusable data (non-increasing timestamps, non-positive or
    /// underivable mid price). Missing optional fields are filled and logged.
    pub fn from_raw(records: Vec<RawTick>, volatility_window: usize) -> Result<Self> {
        let mut ticks = Vec::with_capacity(records.len());
        let mut fills = FillStats::default();
        let mut rolling = RollingVolatility::new(volatility_window);
        let mut prev: Option<(TimestampMs, f64)> = None;

        for (index, raw) in records.into_iter().enumerate() {
            let ts_ms = raw.timestamp.to_millis()?;
            let mid_price = raw.resolve_mid().ok_or_else(|| {
                Error::data(format!("record {index}: no mid_price and no low/high pair"))
            })?;
            if mid_price <= 0.0 {
                return Err(Error::data(format!(
                    "record {index}: mid price must be > 0, got {mid_price}"
                )));
            }
            if let Some((prev_ts, _)) = prev {
                if ts_ms <= prev_ts {
                    return Err(Error::data(format!(
                        "record {index}: timestamp {ts_ms} not after {prev_ts}"
                    )));
                }
            }

            let derived_return = match prev {
                Some((_, prev_mid)) => mid_price / prev_mid - 1.0,
                None => 0.0,
            };
            let returns = match raw.returns {
                Some(r) if r.is_finite() => r,
                Some(_) => {
                    fills.derived_returns += 1;
                    derived_return
                }
                None => derived_return,
            };

            let rolling_vol = rolling.add_price(mid_price);
            let volatility = match raw.volatility {
                Some(v) if v.is_finite() && v >= 0.0 => v,
                _ => match rolling_vol {
                    Some(v) => {
                        fills.derived_volatility += 1;
                        v
                    }
                    None => {
                        fills.default_volatility += 1;
                        DEFAULT_VOLATILITY
                    }
                },
            };

            let mut finite = |value: Option<f64>| match value {
                Some(v) if v.is_finite() => Some(v),
                Some(_) => {
                    fills.dropped_fields += 1;
                    None
                }
                None => None,
            };

            ticks.push(Tick {
                ts_ms,
                mid_price,
                low: finite(raw.low),
                high: finite(raw.high),
                volume: finite(raw.volume),
                spread: finite(raw.spread),
                volatility,
                returns,
            });
            prev = Some((ts_ms, mid_price));
        }

        if fills.default_volatility > 0 || fills.derived_returns > 0 || fills.dropped_fields > 0 {
            warn!(
                default_volatility = fills.default_volatility,
                derived_returns = fills.derived_returns,
                dropped_fields = fills.dropped_fields,
                "filled missing tick fields with defaults"
            );
        }

        Ok(Self { ticks, fills })
    }

    /// Build a series from evenly spaced mid prices.
    pub fn from_mid_prices(
        start_ts_ms: TimestampMs,
        interval_ms: i64,
        prices: &[f64],
        volatility_window: usize,
    ) -> Result<Self> {
        let records = prices
            .iter()
            .enumerate()
            .map(|(i, p)| RawTick::from_mid(start_ts_ms + i as i64 * interval_ms, *p))
            .collect();
        Self::from_raw(records, volatility_window)
    }

    /// Load a JSON array of records.
    pub fn load_json(path: impl AsRef<Path>, volatility_window: usize) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let records: Vec<RawTick> = serde_json::from_str(&contents)?;
        info!(path = %path.display(), records = records.len(), "loaded tick records");
        Self::from_raw(records, volatility_window)
    }

    /// Load newline-delimited JSON records (blank lines skipped).
    pub fn load_jsonl(path: impl AsRef<Path>, volatility_window: usize) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(std::fs::File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str::<RawTick>(&line)?);
        }
        info!(path = %path.display(), records = records.len(), "loaded tick records");
        Self::from_raw(records, volatility_window)
    }

    /// The normalised ticks.
    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }

    /// Consume the series, returning the ticks.
    pub fn into_ticks(self) -> Vec<Tick> {
        self.ticks
    }

    /// Default-fill statistics from normalisation.
    pub fn fills(&self) -> &FillStats {
        &self.fills
    }

    /// Number of ticks.
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// Whether the series is empty.
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Split into consecutive non-overlapping windows of `size` ticks.
    ///
    /// A trailing partial window shorter than `min_size` is dropped.
    pub fn windows(&self, size: usize, min_size: usize) -> Vec<&[Tick]> {
        if size == 0 {
            return Vec::new();
        }
        self.ticks
            .chunks(size)
            .filter(|chunk| chunk.len() >= min_size.max(1))
            .collect()
    }
}
