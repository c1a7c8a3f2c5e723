//! Parallel parameter sweeps.
//!
//! Every run builds its own engine, model, RNG and ledger, so runs are
//! independent and can execute on the rayon pool in any order. Results come
//! back in input order.

use mmsim_core::{Config, ModelConfig, Result, Tick};
use mmsim_ingestion::TickSeries;
use rayon::prelude::*;
use tracing::info;

use crate::engine::{BacktestEngine, BacktestResult};
use crate::quote_model::QuoteModel;

fn run_one<M, F>(ticks: &[Tick], config: Config, run_id: String, factory: &F) -> Result<BacktestResult>
where
    M: QuoteModel,
    F: Fn(&ModelConfig) -> Result<M>,
{
    let model = factory(&config.model)?;
    BacktestEngine::new(config, model)?
        .with_run_id(run_id)
        .run(ticks)
}

/// Run every configuration over the same ticks.
pub fn run_grid<M, F>(ticks: &[Tick], configs: &[Config], factory: F) -> Vec<Result<BacktestResult>>
where
    M: QuoteModel,
    F: Fn(&ModelConfig) -> Result<M> + Sync,
{
    info!(runs = configs.len(), ticks = ticks.len(), "starting grid sweep");
    configs
        .par_iter()
        .enumerate()
        .map(|(i, config)| run_one(ticks, config.clone(), format!("grid-{i}"), &factory))
        .collect()
}

/// Run one configuration under several seeds.
pub fn run_seeds<M, F>(
    ticks: &[Tick],
    config: &Config,
    seeds: &[u64],
    factory: F,
) -> Vec<Result<BacktestResult>>
where
    M: QuoteModel,
    F: Fn(&ModelConfig) -> Result<M> + Sync,
{
    info!(runs = seeds.len(), ticks = ticks.len(), "starting seed sweep");
    seeds
        .par_iter()
        .map(|&seed| {
            let mut config = config.clone();
            config.run.random_seed = seed;
            run_one(ticks, config, format!("seed-{seed}"), &factory)
        })
        .collect()
}

/// Run one configuration over consecutive windows of a series.
///
/// Windows shorter than `min_size` are skipped.
pub fn run_walk_forward<M, F>(
    series: &TickSeries,
    window: usize,
    min_size: usize,
    config: &Config,
    factory: F,
) -> Vec<Result<BacktestResult>>
where
    M: QuoteModel,
    F: Fn(&ModelConfig) -> Result<M> + Sync,
{
    let windows = series.windows(window, min_size);
    info!(runs = windows.len(), window, "starting walk-forward sweep");
    windows
        .par_iter()
        .enumerate()
        .map(|(i, ticks)| run_one(ticks, config.clone(), format!("window-{i}"), &factory))
        .collect()
}

/// Index and result of the successful run with the highest Sharpe ratio.
pub fn best_by_sharpe(results: &[Result<BacktestResult>]) -> Option<(usize, &BacktestResult)> {
    results
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.as_ref().ok().map(|r| (i, r)))
        .max_by(|(_, a), (_, b)| a.metrics.sharpe_ratio.total_cmp(&b.metrics.sharpe_ratio))
}
