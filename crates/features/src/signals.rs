//! Market signal calculations over a window of ticks.

use mmsim_core::{MarketFeatures, Tick};
use ordered_float::OrderedFloat;
use statrs::statistics::Statistics;

/// Simple returns of a price series (length n - 1).
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Mean of the trailing `window` values ending `offset` values from the end.
fn trailing_mean(values: &[f64], window: usize, offset: usize) -> Option<f64> {
    let end = values.len().checked_sub(offset)?;
    let start = end.checked_sub(window)?;
    if window == 0 {
        return None;
    }
    Some(values[start..end].iter().mean())
}

/// Percentile rank of the last value (average rank for ties, divided by n).
pub fn percentile_rank(values: &[f64]) -> Option<f64> {
    let last = *values.last()?;
    if !last.is_finite() {
        return None;
    }
    let mut sorted: Vec<OrderedFloat<f64>> = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .map(OrderedFloat)
        .collect();
    sorted.sort();

    let key = OrderedFloat(last);
    let below = sorted.partition_point(|v| *v < key);
    let through = sorted.partition_point(|v| *v <= key);
    let equal = through - below;
    let avg_rank = below as f64 + (equal as f64 + 1.0) / 2.0;
    Some(avg_rank / sorted.len() as f64)
}

/// Short-term move prediction in [-1, 1] from recent momentum.
///
/// Mean of the last three returns divided by the std of all returns.
pub fn predict_short_term_move(prices: &[f64]) -> f64 {
    if prices.len() < 5 {
        return 0.0;
    }
    let returns = simple_returns(prices);
    let std = returns.iter().std_dev();
    if !(std > 0.0) {
        return 0.0;
    }
    let recent = &returns[returns.len().saturating_sub(3)..];
    let momentum = recent.iter().mean() / std;
    if momentum.is_finite() {
        momentum.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Compute market signals over the last `lookback` ticks of `window`.
///
/// Returns `None` when the window is shorter than the lookback.
pub fn calculate_signals(window: &[Tick], lookback: usize) -> Option<MarketFeatures> {
    if lookback < 2 || window.len() < lookback {
        return None;
    }
    let data = &window[window.len() - lookback..];
    let prices: Vec<f64> = data.iter().map(|t| t.mid_price).collect();
    let last_price = *prices.last()?;
    if !(last_price > 0.0) {
        return None;
    }

    let ma_window = (lookback / 2).clamp(1, 20);
    let mut features = MarketFeatures::default();

    let returns = simple_returns(&prices);
    if returns.len() >= ma_window && ma_window >= 2 {
        let recent = &returns[returns.len() - ma_window..];
        features.volatility = Some(recent.iter().std_dev()).filter(|v| v.is_finite());
    }

    let trend_offset = (lookback / 10).clamp(1, 5);
    if let (Some(ma_now), Some(ma_then)) = (
        trailing_mean(&prices, ma_window, 0),
        trailing_mean(&prices, ma_window, trend_offset - 1),
    ) {
        features.trend_strength = Some(((ma_now - ma_then) / last_price).abs());
        features.mean_reversion = Some((ma_now - last_price) / last_price);
    }

    let momentum_offset = (lookback / 5).clamp(1, 10);
    let reference = prices[prices.len() - momentum_offset];
    if reference > 0.0 {
        features.momentum = Some(last_price / reference - 1.0);
    }

    let spreads: Vec<f64> = data.iter().filter_map(|t| t.spread).collect();
    if spreads.len() == data.len() {
        features.spread = spreads.last().copied();
        features.spread_percentile = percentile_rank(&spreads);
    }

    let volumes: Vec<f64> = data.iter().filter_map(|t| t.volume).collect();
    if volumes.len() == data.len() {
        features.volume_percentile = percentile_rank(&volumes);
    }

    Some(features)
}
