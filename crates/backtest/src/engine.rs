//! Backtest engine.
//!
//! A single sequential scan over a tick series. Per step: push inventory,
//! volatility, features and time remaining into the model, evaluate the risk
//! overlay, stop on a hard drawdown, quote, draw gated fills, apply them to
//! the ledger, enforce the inventory cap and record a snapshot.

use std::borrow::Cow;

use mmsim_core::{Config, Error, PositionSnapshot, Result, Termination, Tick, Trade};
use mmsim_features::FeatureEngine;
use mmsim_ingestion::{TickSeries, DEFAULT_VOLATILITY};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::execution::{ExecutionSimulator, Fills};
use crate::ledger::{liquidation_price, Ledger, OrderSizing, HARD_STOP_LIQUIDATION_PENALTY};
use crate::metrics::{BacktestMetrics, MetricsCalculator};
use crate::quote_model::{HorizonClock, QuoteModel};
use crate::risk_overlay::{OverlayInput, RiskOverlayEngine};

/// Output of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Quote model name.
    pub model: String,
    /// Aggregate metrics.
    pub metrics: BacktestMetrics,
    /// Ordered trade log.
    pub trades: Vec<Trade>,
    /// Ordered per-step snapshots.
    pub snapshots: Vec<PositionSnapshot>,
    /// How the run ended.
    pub termination: Termination,
    /// Steps executed, the hard-stop step included.
    pub steps_processed: usize,
}

/// Backtest engine over a quote model.
pub struct BacktestEngine<M: QuoteModel> {
    config: Config,
    model: M,
    run_id: String,
}

impl<M: QuoteModel> BacktestEngine<M> {
    /// Create an engine. Fails on invalid configuration.
    pub fn new(config: Config, mut model: M) -> Result<Self> {
        config.validate()?;
        model.set_parameters(&config.model)?;
        Ok(Self {
            config,
            model,
            run_id: "run".to_string(),
        })
    }

    /// Label attached to this engine's tracing span.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The quote model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Run over a normalised tick series.
    pub fn run_series(&mut self, series: &TickSeries) -> Result<BacktestResult> {
        self.run(series.ticks())
    }

    /// Run over ticks with strictly increasing timestamps.
    ///
    /// Fails before the first step on out-of-order timestamps or a
    /// non-positive mid. Non-finite volatility and returns are defaulted.
    pub fn run(&mut self, ticks: &[Tick]) -> Result<BacktestResult> {
        if ticks.is_empty() {
            return Err(Error::insufficient_data("tick series is empty"));
        }
        let ticks = sanitize_ticks(ticks)?;
        let ticks: &[Tick] = &ticks;
        let first = &ticks[0];
        let run = &self.config.run;
        let span = info_span!("backtest_run", run_id = %self.run_id, seed = run.random_seed);
        let _enter = span.enter();

        // Fresh state for every run.
        self.model.set_parameters(&self.config.model)?;
        self.model.update_inventory(0.0);
        self.model.set_market_features(None);

        let sizing = OrderSizing::from_config(run, first.mid_price);
        let mut ledger = Ledger::new(run, sizing);
        let mut overlay = RiskOverlayEngine::new(run);
        let mut execution = ExecutionSimulator::new(run);
        let mut features = self
            .config
            .model
            .use_market_features
            .then(FeatureEngine::default);
        let clock = HorizonClock::for_backtest(
            self.config.model.time_source,
            self.config.model.time_horizon,
            first.ts_ms,
            ticks.len(),
        );

        info!(
            model = self.model.name(),
            ticks = ticks.len(),
            base_order_qty = sizing.base_order_qty,
            soft_limit = sizing.soft_limit,
            max_inventory_units = sizing.max_inventory_units,
            "starting backtest"
        );

        let mut termination = Termination::Normal;
        let mut steps_processed = 0;

        for (step, tick) in ticks.iter().enumerate() {
            steps_processed = step + 1;
            let ts = tick.ts_ms;
            let mid = tick.mid_price;

            let step_features = features.as_mut().and_then(|engine| engine.update(tick));
            self.model.update_inventory(ledger.inventory());
            self.model.set_volatility(tick.volatility);
            self.model.set_market_features(step_features);
            self.model.set_time_remaining(clock.fraction_remaining(step, ts));

            let decision = overlay.evaluate(&OverlayInput {
                mid_price: mid,
                volatility: tick.volatility,
                tick_return: tick.returns,
                current_value: ledger.total_value(mid),
                soft_limit: sizing.soft_limit,
            });

            if decision.hard_stop_triggered {
                let inventory = ledger.inventory();
                let price = liquidation_price(mid, inventory, HARD_STOP_LIQUIDATION_PENALTY);
                ledger.liquidate(ts, price, mid);
                ledger.record_snapshot(ts, mid);
                warn!(
                    step,
                    drawdown_pct = decision.drawdown_pct,
                    inventory_before = inventory,
                    "hard drawdown stop; ending run"
                );
                termination = Termination::HardStop { step };
                break;
            }

            let quote = self
                .model
                .calculate_optimal_quotes(mid, decision.effective_spread_constraint);

            let fills = if !execution.edge_allows(&quote, mid, decision.effective_min_edge_bps) {
                Fills::default()
            } else if ledger.consume_cooldown() {
                Fills::default()
            } else {
                execution.simulate_executions(&quote, tick, ledger.inventory())
            };
            let fills = fills.apply_vetoes(&decision, ledger.inventory());

            if fills.bid_filled {
                ledger.buy(ts, quote.bid_px, mid);
            }
            if fills.ask_filled {
                ledger.sell(ts, quote.ask_px, mid);
            }
            ledger.enforce_inventory_limit(ts, mid);

            let snapshot = ledger.record_snapshot(ts, mid);
            debug!(
                step,
                bid = quote.bid_px,
                ask = quote.ask_px,
                inventory = snapshot.inventory,
                total_value = snapshot.total_value,
                "step"
            );
        }

        let (trades, snapshots) = ledger.into_logs();
        let metrics = MetricsCalculator::new(run.initial_capital, run.win_rate_method)
            .calculate(&trades, &snapshots);

        info!(
            total_pnl = metrics.total_pnl,
            n_trades = metrics.n_trades,
            sharpe = metrics.sharpe_ratio,
            hard_stop = termination.is_hard_stop(),
            "backtest completed"
        );

        Ok(BacktestResult {
            model: self.model.name().to_string(),
            metrics,
            trades,
            snapshots,
            termination,
            steps_processed,
        })
    }
}

/// Validate tick ordering and mids, filling unusable volatility and returns.
fn sanitize_ticks(ticks: &[Tick]) -> Result<Cow<'_, [Tick]>> {
    let mut prev_ts = None;
    let mut needs_fill = false;
    for (index, tick) in ticks.iter().enumerate() {
        if !(tick.mid_price.is_finite() && tick.mid_price > 0.0) {
            return Err(Error::data(format!(
                "tick {index}: mid price must be finite and > 0, got {}",
                tick.mid_price
            )));
        }
        if let Some(prev) = prev_ts {
            if tick.ts_ms <= prev {
                return Err(Error::data(format!(
                    "tick {index}: timestamp {} not after {prev}",
                    tick.ts_ms
                )));
            }
        }
        prev_ts = Some(tick.ts_ms);
        needs_fill |= !usable_volatility(tick.volatility) || !tick.returns.is_finite();
    }
    if !needs_fill {
        return Ok(Cow::Borrowed(ticks));
    }

    let mut default_volatility = 0usize;
    let mut default_returns = 0usize;
    let filled = ticks
        .iter()
        .map(|tick| {
            let mut tick = tick.clone();
            if !usable_volatility(tick.volatility) {
                tick.volatility = DEFAULT_VOLATILITY;
                default_volatility += 1;
            }
            if !tick.returns.is_finite() {
                tick.returns = 0.0;
                default_returns += 1;
            }
            tick
        })
        .collect();
    warn!(
        default_volatility,
        default_returns, "filled unusable tick fields with defaults"
    );
    Ok(Cow::Owned(filled))
}

fn usable_volatility(volatility: f64) -> bool {
    volatility.is_finite() && volatility >= 0.0
}
