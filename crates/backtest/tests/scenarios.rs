//! End-to-end backtest scenarios.

use approx::assert_relative_eq;
use mmsim_backtest::{AvellanedaStoikov, BacktestEngine, QuoteModel};
use mmsim_core::{
    Config, MarketFeatures, ModelConfig, Quote, Result, RunConfig, SpreadConstraint, Termination,
    Tick, Trade, TradeSide,
};
use mmsim_ingestion::{SyntheticMarket, SyntheticMarketConfig};

/// Quotes at fixed fractional offsets from mid.
struct FixedOffsets {
    bid_offset: f64,
    ask_offset: f64,
}

impl QuoteModel for FixedOffsets {
    fn name(&self) -> &'static str {
        "fixed_offsets"
    }

    fn set_parameters(&mut self, config: &ModelConfig) -> Result<()> {
        config.validate()
    }

    fn update_inventory(&mut self, _inventory: f64) {}

    fn set_volatility(&mut self, _volatility: f64) {}

    fn set_market_features(&mut self, _features: Option<MarketFeatures>) {}

    fn set_time_remaining(&mut self, _fraction: f64) {}

    fn calculate_optimal_quotes(&self, mid_price: f64, _spread_constraint: Option<f64>) -> Quote {
        Quote::new(
            mid_price * (1.0 + self.bid_offset),
            mid_price * (1.0 + self.ask_offset),
        )
    }
}

fn ticks(prices: &[f64]) -> Vec<Tick> {
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| Tick::new(i as i64 * 60_000, p))
        .collect()
}

fn synthetic(n: usize, seed: u64) -> Vec<Tick> {
    SyntheticMarket::new(SyntheticMarketConfig {
        n_periods: n,
        seed,
        ..Default::default()
    })
    .unwrap()
    .generate()
    .unwrap()
    .into_ticks()
}

#[test]
fn test_scenario_b_quotes_within_cap() {
    let model = AvellanedaStoikov::new(&ModelConfig {
        risk_aversion: 1.0,
        time_horizon: 1.0,
        volatility: 0.01,
        ..Default::default()
    })
    .unwrap();
    let quote = model.calculate_optimal_quotes(2_000.0, None);
    assert!(quote.bid_px < quote.ask_px);
    assert!(quote.ask_px - quote.bid_px <= 20.0);
}

#[test]
fn test_scenario_c_hard_stop_liquidates_once() {
    // Twenty flat ticks build a long position up to the soft limit, then the
    // mid crashes to 10 and the drawdown passes 40% on that step.
    let mut prices = vec![100.0; 20];
    prices.extend([10.0; 10]);
    let ticks = ticks(&prices);

    for seed in [7, 42, 1234] {
        let config = Config {
            model: ModelConfig::default(),
            run: RunConfig {
                initial_capital: 10_000.0,
                transaction_fee: 0.0,
                hard_drawdown_stop_pct: 0.40,
                order_notional_pct: 0.1,
                max_inventory: 10,
                inventory_soft_limit_ratio: 0.9,
                cooldown_steps: 0,
                random_seed: seed,
                ..Default::default()
            },
        };
        let model = FixedOffsets {
            bid_offset: 0.0,
            ask_offset: 0.5,
        };
        let result = BacktestEngine::new(config, model).unwrap().run(&ticks).unwrap();

        assert_eq!(result.termination, Termination::HardStop { step: 20 });
        assert_eq!(result.steps_processed, 21);
        assert_eq!(result.snapshots.len(), 21);

        let before_crash = &result.snapshots[19];
        assert!(before_crash.inventory >= 50.0);
        let last = result.trades.last().unwrap();
        assert_eq!(last.side, TradeSide::Liquidation);
        assert_eq!(last.ts_ms, ticks[20].ts_ms);
        assert_relative_eq!(last.price, 10.0 * 0.995);
        assert_relative_eq!(last.quantity, before_crash.inventory);
        let liquidations = result
            .trades
            .iter()
            .filter(|t| t.side == TradeSide::Liquidation)
            .count();
        assert_eq!(liquidations, 1);
        assert_eq!(result.snapshots.last().unwrap().inventory, 0.0);
    }
}

#[test]
fn test_scenario_d_insufficient_edge_blocks_fills() {
    // Gross spread 6 bps, net 2 bps after fees; the bid crosses mid.
    let config = Config {
        model: ModelConfig::default(),
        run: RunConfig {
            transaction_fee: 0.0002,
            min_edge_bps: 2.5,
            cooldown_steps: 0,
            ..Default::default()
        },
    };
    let model = FixedOffsets {
        bid_offset: 0.0001,
        ask_offset: 0.0007,
    };
    let result = BacktestEngine::new(config, model)
        .unwrap()
        .run(&ticks(&[100.0; 100]))
        .unwrap();
    assert!(result.trades.is_empty());
    assert_eq!(result.metrics.n_trades, 0);
}

#[test]
fn test_enough_edge_allows_fills() {
    let config = Config {
        model: ModelConfig::default(),
        run: RunConfig {
            transaction_fee: 0.0002,
            min_edge_bps: 2.5,
            cooldown_steps: 0,
            ..Default::default()
        },
    };
    let model = FixedOffsets {
        bid_offset: 0.0001,
        ask_offset: 0.0010,
    };
    let result = BacktestEngine::new(config, model)
        .unwrap()
        .run(&ticks(&[100.0; 100]))
        .unwrap();
    assert!(!result.trades.is_empty());
}

#[test]
fn test_same_seed_identical_trade_logs() {
    let ticks = synthetic(1_000, 11);
    let run = |seed: u64| {
        let mut config = Config::default();
        config.run.random_seed = seed;
        let model = AvellanedaStoikov::new(&config.model).unwrap();
        BacktestEngine::new(config, model).unwrap().run(&ticks).unwrap()
    };
    let a = run(42);
    let b = run(42);
    assert_eq!(a.trades, b.trades);
    assert_eq!(a.snapshots, b.snapshots);
    let c = run(43);
    assert_ne!(a.trades, c.trades);
}

#[test]
fn test_run_invariants_on_synthetic_market() {
    mmsim_core::telemetry::init_tracing("warn");
    let ticks = synthetic(2_000, 5);
    let mut config = Config::default();
    config.run.spread_constraint = SpreadConstraint::Bps(5.0);
    config.run.soft_drawdown_risk_pct = 0.02;
    config.run.adverse_return_bps = 30.0;
    config.model.use_market_features = true;
    let model = AvellanedaStoikov::new(&config.model).unwrap();
    let result = BacktestEngine::new(config, model).unwrap().run(&ticks).unwrap();

    assert_eq!(result.snapshots.len(), result.steps_processed);
    for snapshot in &result.snapshots {
        assert_relative_eq!(
            snapshot.total_value,
            snapshot.capital + snapshot.inventory * snapshot.mid_price
        );
    }
    for trade in &result.trades {
        assert!(trade.fee >= 0.0);
        if trade.side == TradeSide::Liquidation {
            assert_eq!(trade.inventory, 0.0);
        }
    }
    let metrics = &result.metrics;
    assert!(metrics.max_drawdown >= 0.0);
    assert!(metrics.sharpe_ratio.is_finite());
    assert!((0.0..=1.0).contains(&metrics.win_rate));
    assert_relative_eq!(
        metrics.total_pnl,
        result.snapshots.last().unwrap().total_value - 10_000.0,
        epsilon = 1e-9
    );
}

#[test]
fn test_forced_liquidation_on_inventory_cap() {
    // Crossing bid, unreachable ask: inventory builds until the cap fires.
    let config = Config {
        model: ModelConfig::default(),
        run: RunConfig {
            transaction_fee: 0.0,
            cooldown_steps: 0,
            max_inventory: 2,
            inventory_soft_limit_ratio: 0.99,
            ..Default::default()
        },
    };
    let model = FixedOffsets {
        bid_offset: 0.0,
        ask_offset: 1.0,
    };
    let result = BacktestEngine::new(config, model)
        .unwrap()
        .run(&ticks(&[100.0; 200]))
        .unwrap();

    let liquidation = result
        .trades
        .iter()
        .find(|t| t.side == TradeSide::Liquidation)
        .unwrap();
    assert_relative_eq!(liquidation.price, 98.0);
    assert_eq!(liquidation.inventory, 0.0);
    assert_eq!(result.termination, Termination::Normal);
}

/// Quotes with a wide spread at or below `blocked_above`, zero spread above it.
struct EdgeGated {
    blocked_above: f64,
}

impl QuoteModel for EdgeGated {
    fn name(&self) -> &'static str {
        "edge_gated"
    }

    fn set_parameters(&mut self, config: &ModelConfig) -> Result<()> {
        config.validate()
    }

    fn update_inventory(&mut self, _inventory: f64) {}

    fn set_volatility(&mut self, _volatility: f64) {}

    fn set_market_features(&mut self, _features: Option<MarketFeatures>) {}

    fn set_time_remaining(&mut self, _fraction: f64) {}

    fn calculate_optimal_quotes(&self, mid_price: f64, _spread_constraint: Option<f64>) -> Quote {
        if mid_price > self.blocked_above {
            Quote::new(mid_price, mid_price)
        } else {
            Quote::new(mid_price, mid_price * 1.001)
        }
    }
}

fn trade_steps(trades: &[Trade]) -> Vec<usize> {
    trades
        .iter()
        .map(|t| (t.ts_ms / 60_000) as usize)
        .collect()
}

#[test]
fn test_cooldown_blocks_following_steps() {
    let config = Config {
        model: ModelConfig::default(),
        run: RunConfig {
            transaction_fee: 0.0,
            cooldown_steps: 2,
            ..Default::default()
        },
    };
    let model = FixedOffsets {
        bid_offset: 0.0,
        ask_offset: 0.0,
    };
    let result = BacktestEngine::new(config, model)
        .unwrap()
        .run(&ticks(&[100.0; 300]))
        .unwrap();

    let steps = trade_steps(&result.trades);
    assert!(steps.len() > 20);
    assert!(result.trades.iter().all(|t| t.side != TradeSide::Liquidation));
    let gaps: Vec<usize> = steps.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(gaps.iter().all(|&gap| gap >= 3), "gaps: {gaps:?}");
    assert!(gaps.contains(&3));
}

#[test]
fn test_failed_edge_check_keeps_cooldown() {
    // Steps priced at 101 fail the edge check and must not count down.
    let pattern = [100.0, 101.0, 101.0, 100.0, 100.0, 100.0];
    let prices: Vec<f64> = pattern.iter().copied().cycle().take(300).collect();
    let passing = |step: usize| prices[step] <= 100.0;

    for seed in [1, 2, 3] {
        let config = Config {
            model: ModelConfig::default(),
            run: RunConfig {
                transaction_fee: 0.0,
                min_edge_bps: 1.0,
                cooldown_steps: 2,
                random_seed: seed,
                ..Default::default()
            },
        };
        let model = EdgeGated { blocked_above: 100.0 };
        let result = BacktestEngine::new(config, model)
            .unwrap()
            .run(&ticks(&prices))
            .unwrap();

        let steps = trade_steps(&result.trades);
        assert!(steps.len() > 10);
        assert!(steps.iter().all(|&step| passing(step)));

        let mut spans_blocked = 0;
        for pair in steps.windows(2) {
            let between = (pair[0] + 1)..pair[1];
            let passed = between.clone().filter(|&step| passing(step)).count();
            assert!(passed >= 2, "trades at {} and {}", pair[0], pair[1]);
            if passed == 2 && between.len() > 2 {
                spans_blocked += 1;
            }
        }
        assert!(spans_blocked > 0);
    }
}

#[test]
fn test_hard_stop_while_flat_books_no_liquidation() {
    // Buys at mid and sells 30% below it: every round trip loses 300 and
    // ends flat, so the 10% stop fires with no inventory left.
    let config = Config {
        model: ModelConfig::default(),
        run: RunConfig {
            initial_capital: 10_000.0,
            transaction_fee: 0.0,
            hard_drawdown_stop_pct: 0.10,
            order_notional_pct: 0.1,
            max_inventory: 2,
            inventory_soft_limit_ratio: 0.5,
            cooldown_steps: 0,
            ..Default::default()
        },
    };
    let model = FixedOffsets {
        bid_offset: 0.0,
        ask_offset: -0.3,
    };
    let result = BacktestEngine::new(config, model)
        .unwrap()
        .run(&ticks(&[100.0; 300]))
        .unwrap();

    let Termination::HardStop { step } = result.termination else {
        panic!("expected a hard stop, got {:?}", result.termination);
    };
    assert_eq!(result.steps_processed, step + 1);
    assert!(result.trades.iter().all(|t| t.side != TradeSide::Liquidation));
    assert_eq!(result.trades.last().unwrap().side, TradeSide::Sell);
    let last = result.snapshots.last().unwrap();
    assert_eq!(last.inventory, 0.0);
    assert_eq!(last.ts_ms, step as i64 * 60_000);
    assert_relative_eq!(last.total_value, 8_800.0, epsilon = 1e-6);
    assert_eq!(
        result.trades.iter().filter(|t| t.side == TradeSide::Sell).count(),
        4
    );
}
