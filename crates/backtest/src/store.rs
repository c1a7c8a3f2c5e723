//! SQLite persistence of backtest results.
//!
//! Tables: `runs` (one row per run, config/metrics/termination as JSON),
//! `trades` and `snapshots` (ordered logs keyed by run id and sequence).

use std::path::Path;

use chrono::Utc;
use mmsim_core::{Config, Error, PositionSnapshot, Result, Trade, TradeSide};
use rusqlite::{params, Connection};
use tracing::info;

use crate::engine::BacktestResult;
use crate::metrics::BacktestMetrics;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    label           TEXT NOT NULL,
    model           TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    config_json     TEXT NOT NULL,
    metrics_json    TEXT NOT NULL,
    termination     TEXT NOT NULL,
    steps_processed INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS trades (
    run_id    INTEGER NOT NULL REFERENCES runs(id),
    seq       INTEGER NOT NULL,
    ts_ms     INTEGER NOT NULL,
    side      TEXT NOT NULL,
    price     REAL NOT NULL,
    quantity  REAL NOT NULL,
    fee       REAL NOT NULL,
    mid_price REAL NOT NULL,
    inventory REAL NOT NULL,
    capital   REAL NOT NULL,
    PRIMARY KEY (run_id, seq)
);
CREATE TABLE IF NOT EXISTS snapshots (
    run_id         INTEGER NOT NULL REFERENCES runs(id),
    seq            INTEGER NOT NULL,
    ts_ms          INTEGER NOT NULL,
    mid_price      REAL NOT NULL,
    inventory      REAL NOT NULL,
    capital        REAL NOT NULL,
    unrealized_pnl REAL NOT NULL,
    total_value    REAL NOT NULL,
    PRIMARY KEY (run_id, seq)
);
"#;

trait DbResultExt<T> {
    fn db(self) -> Result<T>;
}

impl<T> DbResultExt<T> for rusqlite::Result<T> {
    fn db(self) -> Result<T> {
        self.map_err(|e| Error::database(e.to_string()))
    }
}

/// Summary row of a stored run.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRun {
    pub id: i64,
    pub label: String,
    pub model: String,
    pub created_at: String,
    pub steps_processed: usize,
}

/// SQLite-backed result store.
pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).db()?;
        Self::init(conn)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().db()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).db()?;
        Ok(Self { conn })
    }

    /// Persist a run and its logs. Returns the new run id.
    pub fn save_run(&mut self, label: &str, config: &Config, result: &BacktestResult) -> Result<i64> {
        let config_json = serde_json::to_string(config)?;
        let metrics_json = serde_json::to_string(&result.metrics)?;
        let termination = serde_json::to_string(&result.termination)?;

        let tx = self.conn.transaction().db()?;
        tx.execute(
            "INSERT INTO runs (label, model, created_at, config_json, metrics_json, termination, steps_processed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                label,
                result.model,
                Utc::now().to_rfc3339(),
                config_json,
                metrics_json,
                termination,
                result.steps_processed as i64,
            ],
        )
        .db()?;
        let run_id = tx.last_insert_rowid();

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO trades (run_id, seq, ts_ms, side, price, quantity, fee, mid_price, inventory, capital)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )
                .db()?;
            for (seq, t) in result.trades.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    seq as i64,
                    t.ts_ms,
                    t.side.as_str(),
                    t.price,
                    t.quantity,
                    t.fee,
                    t.mid_price,
                    t.inventory,
                    t.capital,
                ])
                .db()?;
            }

            let mut stmt = tx
                .prepare(
                    "INSERT INTO snapshots (run_id, seq, ts_ms, mid_price, inventory, capital, unrealized_pnl, total_value)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .db()?;
            for (seq, s) in result.snapshots.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    seq as i64,
                    s.ts_ms,
                    s.mid_price,
                    s.inventory,
                    s.capital,
                    s.unrealized_pnl,
                    s.total_value,
                ])
                .db()?;
            }
        }

        tx.commit().db()?;
        info!(run_id, label, trades = result.trades.len(), "stored backtest run");
        Ok(run_id)
    }

    /// Trade log of a run, in execution order.
    pub fn load_trades(&self, run_id: i64) -> Result<Vec<Trade>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT ts_ms, side, price, quantity, fee, mid_price, inventory, capital
                 FROM trades WHERE run_id = ?1 ORDER BY seq",
            )
            .db()?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, f64>(7)?,
                ))
            })
            .db()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .db()?;

        rows.into_iter()
            .map(|(ts_ms, side, price, quantity, fee, mid_price, inventory, capital)| {
                let side = TradeSide::parse(&side)
                    .ok_or_else(|| Error::data(format!("unknown trade side '{side}'")))?;
                Ok(Trade {
                    ts_ms,
                    side,
                    price,
                    quantity,
                    fee,
                    mid_price,
                    inventory,
                    capital,
                })
            })
            .collect()
    }

    /// Snapshot log of a run, in step order.
    pub fn load_snapshots(&self, run_id: i64) -> Result<Vec<PositionSnapshot>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT ts_ms, mid_price, inventory, capital, unrealized_pnl, total_value
                 FROM snapshots WHERE run_id = ?1 ORDER BY seq",
            )
            .db()?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(PositionSnapshot {
                    ts_ms: row.get(0)?,
                    mid_price: row.get(1)?,
                    inventory: row.get(2)?,
                    capital: row.get(3)?,
                    unrealized_pnl: row.get(4)?,
                    total_value: row.get(5)?,
                })
            })
            .db()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .db()?;
        Ok(rows)
    }

    /// Metrics of a run.
    pub fn load_metrics(&self, run_id: i64) -> Result<BacktestMetrics> {
        let json: String = self
            .conn
            .query_row(
                "SELECT metrics_json FROM runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Error::data(format!("no run with id {run_id}")),
                other => Error::database(other.to_string()),
            })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// All stored runs, oldest first.
    pub fn list_runs(&self) -> Result<Vec<StoredRun>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, label, model, created_at, steps_processed FROM runs ORDER BY id")
            .db()?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StoredRun {
                    id: row.get(0)?,
                    label: row.get(1)?,
                    model: row.get(2)?,
                    created_at: row.get(3)?,
                    steps_processed: row.get::<_, i64>(4)? as usize,
                })
            })
            .db()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .db()?;
        Ok(rows)
    }
}
