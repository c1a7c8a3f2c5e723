//! Capital and inventory accounting for backtesting.
//!
//! Applies fills, charges fees, force-liquidates on inventory breaches and
//! records the trade and snapshot logs.

use mmsim_core::{PositionSnapshot, RunConfig, TimestampMs, Trade, TradeSide};
use tracing::warn;

/// Liquidation price discount when the inventory cap is breached.
pub const FORCED_LIQUIDATION_PENALTY: f64 = 0.02;
/// Liquidation price discount on a hard drawdown stop.
pub const HARD_STOP_LIQUIDATION_PENALTY: f64 = 0.005;

/// Per-run order sizing, fixed from the first mid price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderSizing {
    /// Quantity quoted on each side.
    pub base_order_qty: f64,
    /// Smallest executable quantity.
    pub min_order_qty: f64,
    /// Inventory at which the adding side is vetoed.
    pub soft_limit: f64,
    /// Inventory at which the position is force-liquidated.
    pub max_inventory_units: f64,
}

impl OrderSizing {
    /// Derive sizing from the run configuration and the first mid price.
    pub fn from_config(config: &RunConfig, first_mid: f64) -> Self {
        let notional_pct = config.order_notional_pct.clamp(0.001, 0.5);
        let min_order_qty = config.min_order_qty.max(1e-8);
        let max_order_qty = config.max_order_qty.max(min_order_qty);
        let base_order_qty = (config.initial_capital * notional_pct / first_mid.max(1e-9))
            .clamp(min_order_qty, max_order_qty);

        let ratio = config.inventory_soft_limit_ratio.clamp(0.1, 0.99);
        let max_inventory = f64::from(config.max_inventory);

        Self {
            base_order_qty,
            min_order_qty,
            soft_limit: base_order_qty.max(max_inventory * ratio * base_order_qty),
            max_inventory_units: base_order_qty.max(max_inventory * base_order_qty),
        }
    }
}

/// Price at which `inventory` is liquidated given a penalty fraction.
pub fn liquidation_price(mid_price: f64, inventory: f64, penalty: f64) -> f64 {
    if inventory > 0.0 {
        mid_price * (1.0 - penalty)
    } else {
        mid_price * (1.0 + penalty)
    }
}

/// Run ledger.
#[derive(Debug, Clone)]
pub struct Ledger {
    capital: f64,
    inventory: f64,
    fee_rate: f64,
    cooldown_steps: u32,
    cooldown_remaining: u32,
    sizing: OrderSizing,
    trades: Vec<Trade>,
    snapshots: Vec<PositionSnapshot>,
}

impl Ledger {
    /// Fresh ledger with the initial capital and no inventory.
    pub fn new(config: &RunConfig, sizing: OrderSizing) -> Self {
        Self {
            capital: config.initial_capital,
            inventory: 0.0,
            fee_rate: config.transaction_fee,
            cooldown_steps: config.cooldown_steps,
            cooldown_remaining: 0,
            sizing,
            trades: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    /// Current capital.
    pub fn capital(&self) -> f64 {
        self.capital
    }

    /// Current signed inventory.
    pub fn inventory(&self) -> f64 {
        self.inventory
    }

    /// Order sizing for this run.
    pub fn sizing(&self) -> &OrderSizing {
        &self.sizing
    }

    /// Steps left before the next fill is allowed.
    pub fn cooldown_remaining(&self) -> u32 {
        self.cooldown_remaining
    }

    /// Trades so far.
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Snapshots so far.
    pub fn snapshots(&self) -> &[PositionSnapshot] {
        &self.snapshots
    }

    /// Capital plus inventory marked at `mid_price`.
    pub fn total_value(&self, mid_price: f64) -> f64 {
        self.capital + self.inventory * mid_price
    }

    /// Burn one cooldown step. Returns true if the step is blocked.
    pub fn consume_cooldown(&mut self) -> bool {
        if self.cooldown_remaining > 0 {
            self.cooldown_remaining -= 1;
            true
        } else {
            false
        }
    }

    /// Buy up to the base size at `price`, limited by available capital.
    pub fn buy(&mut self, ts_ms: TimestampMs, price: f64, mid_price: f64) -> Option<&Trade> {
        let affordable = self.capital / (price * (1.0 + self.fee_rate)).max(1e-9);
        let qty = self.sizing.base_order_qty.min(affordable.max(0.0));
        if !(qty >= self.sizing.min_order_qty) {
            return None;
        }
        self.cooldown_remaining = self.cooldown_steps;
        Some(self.apply_trade(ts_ms, TradeSide::Buy, price, qty, mid_price))
    }

    /// Sell up to the base size at `price` out of long inventory.
    pub fn sell(&mut self, ts_ms: TimestampMs, price: f64, mid_price: f64) -> Option<&Trade> {
        if self.inventory <= 0.0 {
            return None;
        }
        let qty = self.sizing.base_order_qty.min(self.inventory);
        if !(qty >= self.sizing.min_order_qty) {
            return None;
        }
        self.cooldown_remaining = self.cooldown_steps;
        Some(self.apply_trade(ts_ms, TradeSide::Sell, price, qty, mid_price))
    }

    /// Close the whole position at `price`. Returns None when flat.
    pub fn liquidate(&mut self, ts_ms: TimestampMs, price: f64, mid_price: f64) -> Option<&Trade> {
        if self.inventory == 0.0 {
            return None;
        }
        let qty = self.inventory;
        Some(self.apply_trade(ts_ms, TradeSide::Liquidation, price, qty, mid_price))
    }

    /// Force-liquidate at a 2% penalty if |inventory| reached the cap.
    pub fn enforce_inventory_limit(&mut self, ts_ms: TimestampMs, mid_price: f64) -> bool {
        let inventory = self.inventory;
        if inventory.abs() < self.sizing.max_inventory_units {
            return false;
        }
        let price = liquidation_price(mid_price, inventory, FORCED_LIQUIDATION_PENALTY);
        self.liquidate(ts_ms, price, mid_price);
        warn!(
            inventory_before = inventory,
            limit = self.sizing.max_inventory_units,
            price,
            "forced liquidation on inventory limit"
        );
        true
    }

    /// Append a snapshot marked at `mid_price`.
    pub fn record_snapshot(&mut self, ts_ms: TimestampMs, mid_price: f64) -> &PositionSnapshot {
        let snapshot = PositionSnapshot::new(ts_ms, mid_price, self.inventory, self.capital);
        self.snapshots.push(snapshot);
        &self.snapshots[self.snapshots.len() - 1]
    }

    /// Consume the ledger into its trade and snapshot logs.
    pub fn into_logs(self) -> (Vec<Trade>, Vec<PositionSnapshot>) {
        (self.trades, self.snapshots)
    }

    /// Apply a trade to capital and inventory and append it to the log.
    ///
    /// For liquidations `quantity` is the signed inventory being closed.
    fn apply_trade(
        &mut self,
        ts_ms: TimestampMs,
        side: TradeSide,
        price: f64,
        quantity: f64,
        mid_price: f64,
    ) -> &Trade {
        let fee = (price * quantity * self.fee_rate).abs();
        match side {
            TradeSide::Buy => {
                self.inventory += quantity;
                self.capital -= price * quantity + fee;
            }
            TradeSide::Sell => {
                self.inventory -= quantity;
                self.capital += price * quantity - fee;
            }
            TradeSide::Liquidation => {
                self.capital += price * quantity - fee;
                self.inventory = 0.0;
            }
        }
        self.trades.push(Trade {
            ts_ms,
            side,
            price,
            quantity,
            fee,
            mid_price,
            inventory: self.inventory,
            capital: self.capital,
        });
        &self.trades[self.trades.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> RunConfig {
        RunConfig {
            initial_capital: 1_000.0,
            transaction_fee: 0.001,
            order_notional_pct: 0.5,
            max_inventory: 10,
            max_order_qty: 100.0,
            ..Default::default()
        }
    }

    fn ledger() -> Ledger {
        let config = config();
        let sizing = OrderSizing::from_config(&config, 100.0);
        Ledger::new(&config, sizing)
    }

    #[test]
    fn test_sizing() {
        let sizing = OrderSizing::from_config(&config(), 100.0);
        assert_relative_eq!(sizing.base_order_qty, 5.0);
        assert_relative_eq!(sizing.soft_limit, 40.0);
        assert_relative_eq!(sizing.max_inventory_units, 50.0);

        let clamped = OrderSizing::from_config(
            &RunConfig {
                max_order_qty: 1.0,
                ..config()
            },
            100.0,
        );
        assert_relative_eq!(clamped.base_order_qty, 1.0);
    }

    #[test]
    fn test_buy_then_sell() {
        let mut ledger = ledger();
        let trade = ledger.buy(1, 100.0, 100.0).cloned().unwrap();
        assert_eq!(trade.side, TradeSide::Buy);
        assert_relative_eq!(trade.quantity, 5.0);
        assert_relative_eq!(trade.fee, 0.5);
        assert_relative_eq!(ledger.capital(), 1_000.0 - 500.0 - 0.5);
        assert_relative_eq!(ledger.inventory(), 5.0);
        assert_eq!(ledger.cooldown_remaining(), 1);

        let trade = ledger.sell(2, 101.0, 100.0).cloned().unwrap();
        assert_eq!(trade.side, TradeSide::Sell);
        assert_relative_eq!(ledger.inventory(), 0.0);
        assert_relative_eq!(ledger.capital(), 499.5 + 505.0 - 0.505, epsilon = 1e-9);
    }

    #[test]
    fn test_buy_limited_by_capital() {
        let mut ledger = ledger();
        ledger.buy(1, 100.0, 100.0);
        ledger.buy(2, 100.0, 100.0);
        // Under 1 unit of capital left: below min qty at price 1000.
        let qty = ledger.capital() / (1_000.0 * 1.001);
        assert!(qty < 0.0001);
        assert!(ledger.buy(3, 1_000.0, 1_000.0).is_none());
    }

    #[test]
    fn test_sell_requires_long_inventory() {
        let mut ledger = ledger();
        assert!(ledger.sell(1, 100.0, 100.0).is_none());
        assert!(ledger.trades().is_empty());
    }

    #[test]
    fn test_liquidation_scenario() {
        let mut ledger = ledger();
        ledger.inventory = 5.0;
        let trade = ledger.liquidate(1, 100.0, 100.0).cloned().unwrap();
        assert_eq!(trade.side, TradeSide::Liquidation);
        assert_relative_eq!(trade.quantity, 5.0);
        assert_relative_eq!(ledger.capital(), 1_499.5);
        assert_eq!(ledger.inventory(), 0.0);
        assert!(ledger.liquidate(2, 100.0, 100.0).is_none());
    }

    #[test]
    fn test_short_liquidation_buys_back() {
        let mut ledger = ledger();
        ledger.inventory = -2.0;
        ledger.liquidate(1, 50.0, 50.0);
        assert_relative_eq!(ledger.capital(), 1_000.0 - 100.0 - 0.1);
        assert_eq!(ledger.inventory(), 0.0);
    }

    #[test]
    fn test_inventory_limit_forces_liquidation() {
        let mut ledger = ledger();
        ledger.inventory = 49.0;
        assert!(!ledger.enforce_inventory_limit(1, 100.0));
        ledger.inventory = 50.0;
        assert!(ledger.enforce_inventory_limit(2, 100.0));
        let trade = &ledger.trades()[0];
        assert_relative_eq!(trade.price, 98.0);
        assert_eq!(ledger.inventory(), 0.0);
    }

    #[test]
    fn test_liquidation_price_direction() {
        assert_relative_eq!(liquidation_price(100.0, 1.0, 0.005), 99.5);
        assert_relative_eq!(liquidation_price(100.0, -1.0, 0.005), 100.5);
    }

    #[test]
    fn test_cooldown() {
        let mut ledger = ledger();
        assert!(!ledger.consume_cooldown());
        ledger.buy(1, 100.0, 100.0);
        assert!(ledger.consume_cooldown());
        assert!(!ledger.consume_cooldown());
    }

    #[test]
    fn test_snapshot_identity() {
        let mut ledger = ledger();
        ledger.buy(1, 100.0, 100.0);
        let snapshot = ledger.record_snapshot(1, 103.0).clone();
        assert_relative_eq!(
            snapshot.total_value,
            snapshot.capital + snapshot.inventory * snapshot.mid_price
        );
        assert_relative_eq!(snapshot.total_value, ledger.total_value(103.0));
        assert_eq!(ledger.snapshots().len(), 1);
    }
}
