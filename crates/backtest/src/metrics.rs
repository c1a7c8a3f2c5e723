//! Backtest performance metrics.
//!
//! Aggregates the trade and snapshot logs of a finished run into P&L,
//! drawdown, Sharpe and win-rate figures.

use std::collections::VecDeque;

use mmsim_core::{PositionSnapshot, TimestampMs, Trade, TradeSide, WinRateMethod};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Annualisation factor applied to the per-step Sharpe ratio.
pub const SHARPE_ANNUALIZATION: f64 = 252.0;

/// Backtest performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    /// Final total value minus initial capital.
    pub total_pnl: f64,
    /// SELL notional minus BUY notional minus all fees.
    pub realized_pnl: f64,
    /// Marked inventory value at the last snapshot.
    pub unrealized_pnl: f64,
    /// Maximum drawdown (absolute).
    pub max_drawdown: f64,
    /// Maximum drawdown as a fraction of the running peak.
    pub max_drawdown_pct: f64,
    /// Largest absolute inventory over the run.
    pub max_inventory: f64,
    /// Number of trades, liquidations included.
    pub n_trades: usize,
    /// Annualised mean / std of step returns; 0 when undefined.
    pub sharpe_ratio: f64,
    /// Profitable matched SELLs over matched SELLs.
    pub win_rate: f64,
    /// Matching method behind `win_rate`.
    pub win_rate_method: WinRateMethod,
    /// Total fees paid.
    pub total_fees: f64,
    /// Total return percentage.
    pub total_return_pct: f64,
}

/// Equity curve point.
#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub ts_ms: TimestampMs,
    pub equity: f64,
    pub drawdown: f64,
    pub drawdown_pct: f64,
}

/// Metrics calculator.
#[derive(Debug, Clone)]
pub struct MetricsCalculator {
    initial_capital: f64,
    win_rate_method: WinRateMethod,
}

impl MetricsCalculator {
    /// Create a new metrics calculator.
    pub fn new(initial_capital: f64, win_rate_method: WinRateMethod) -> Self {
        Self {
            initial_capital,
            win_rate_method,
        }
    }

    /// Calculate metrics from a run's logs.
    pub fn calculate(&self, trades: &[Trade], snapshots: &[PositionSnapshot]) -> BacktestMetrics {
        let mut metrics = BacktestMetrics {
            win_rate_method: self.win_rate_method,
            n_trades: trades.len(),
            ..Default::default()
        };

        let mut sell_notional = 0.0;
        let mut buy_notional = 0.0;
        for trade in trades {
            metrics.total_fees += trade.fee;
            match trade.side {
                TradeSide::Buy => buy_notional += trade.notional(),
                TradeSide::Sell => sell_notional += trade.notional(),
                TradeSide::Liquidation => {}
            }
        }
        metrics.realized_pnl = sell_notional - buy_notional - metrics.total_fees;

        metrics.win_rate = match self.win_rate_method {
            WinRateMethod::Fifo => fifo_win_rate(trades),
            WinRateMethod::LastBuy => last_buy_win_rate(trades),
        };

        let Some(last) = snapshots.last() else {
            return metrics;
        };

        metrics.total_pnl = last.total_value - self.initial_capital;
        metrics.unrealized_pnl = last.unrealized_pnl;
        metrics.total_return_pct = metrics.total_pnl / self.initial_capital * 100.0;
        metrics.max_inventory = snapshots
            .iter()
            .map(|s| s.inventory.abs())
            .fold(0.0, f64::max);

        for point in self.build_equity_curve(snapshots) {
            if point.drawdown > metrics.max_drawdown {
                metrics.max_drawdown = point.drawdown;
            }
            metrics.max_drawdown_pct = metrics.max_drawdown_pct.max(point.drawdown_pct);
        }

        metrics.sharpe_ratio = self.calculate_sharpe(snapshots);
        metrics
    }

    /// Build the equity curve from snapshots.
    ///
    /// The running peak starts at the first snapshot.
    pub fn build_equity_curve(&self, snapshots: &[PositionSnapshot]) -> Vec<EquityPoint> {
        let mut curve = Vec::with_capacity(snapshots.len());
        let mut peak = f64::NEG_INFINITY;

        for snapshot in snapshots {
            let equity = snapshot.total_value;
            peak = peak.max(equity);

            let drawdown = (peak - equity).max(0.0);
            let drawdown_pct = if peak > 0.0 { drawdown / peak } else { 0.0 };

            curve.push(EquityPoint {
                ts_ms: snapshot.ts_ms,
                equity,
                drawdown,
                drawdown_pct,
            });
        }

        curve
    }

    /// Annualised Sharpe ratio of step-over-step total value returns.
    fn calculate_sharpe(&self, snapshots: &[PositionSnapshot]) -> f64 {
        let returns: Vec<f64> = snapshots
            .windows(2)
            .map(|w| w[1].total_value / w[0].total_value - 1.0)
            .filter(|r| r.is_finite())
            .collect();
        if returns.len() < 2 {
            return 0.0;
        }

        let mean = returns.iter().mean();
        let std_dev = returns.iter().std_dev();

        if std_dev > 0.0 && std_dev.is_finite() {
            mean / std_dev * SHARPE_ANNUALIZATION.sqrt()
        } else {
            0.0
        }
    }
}

/// Win rate with an explicit lot queue: each SELL consumes the oldest BUY lots.
///
/// Liquidations close out every open lot. SELLs with no open lot are not counted.
fn fifo_win_rate(trades: &[Trade]) -> f64 {
    let mut lots: VecDeque<(f64, f64)> = VecDeque::new();
    let mut matched = 0u32;
    let mut wins = 0u32;

    for trade in trades {
        match trade.side {
            TradeSide::Buy => lots.push_back((trade.quantity, trade.price)),
            TradeSide::Liquidation => lots.clear(),
            TradeSide::Sell => {
                let mut remaining = trade.quantity;
                let mut matched_qty = 0.0;
                let mut cost = 0.0;
                while remaining > 0.0 {
                    let Some(lot) = lots.front_mut() else { break };
                    let take = remaining.min(lot.0);
                    matched_qty += take;
                    cost += take * lot.1;
                    remaining -= take;
                    lot.0 -= take;
                    if lot.0 <= 1e-12 {
                        lots.pop_front();
                    }
                }
                if matched_qty > 0.0 {
                    matched += 1;
                    if trade.price * matched_qty > cost {
                        wins += 1;
                    }
                }
            }
        }
    }

    ratio(wins, matched)
}

/// Win rate comparing each SELL to the most recent BUY with an earlier timestamp.
fn last_buy_win_rate(trades: &[Trade]) -> f64 {
    let mut matched = 0u32;
    let mut wins = 0u32;

    for (i, sell) in trades.iter().enumerate() {
        if sell.side != TradeSide::Sell {
            continue;
        }
        let last_buy = trades[..i]
            .iter()
            .rev()
            .find(|t| t.side == TradeSide::Buy && t.ts_ms < sell.ts_ms);
        if let Some(buy) = last_buy {
            matched += 1;
            if sell.price > buy.price {
                wins += 1;
            }
        }
    }

    ratio(wins, matched)
}

fn ratio(wins: u32, total: u32) -> f64 {
    if total > 0 {
        f64::from(wins) / f64::from(total)
    } else {
        0.0
    }
}
