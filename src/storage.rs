// =============================================================================
// Persistence — SQLite trade log, daily P&L, and bot state
// =============================================================================
//
// Three tables:
//   trades     — append log of entries, updated in place on exit
//   daily_pnl  — one row per date, upsert semantics on the date key
//   bot_state  — key/value pairs for opaque durable blobs
//
// Writes are short single-writer critical sections behind one mutex. A
// persistence failure is non-fatal everywhere: callers log and continue, and
// in-memory trading state never depends on write success.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_time    TEXT NOT NULL,
    exit_time     TEXT,
    ticker        TEXT NOT NULL,
    direction     TEXT NOT NULL,
    quantity      REAL NOT NULL,
    entry_price   REAL NOT NULL,
    exit_price    REAL,
    stop_loss     REAL,
    take_profit   REAL,
    commission    REAL NOT NULL DEFAULT 0,
    pnl           REAL,
    pnl_pct       REAL,
    exit_reason   TEXT,
    signal_reason TEXT,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_pnl (
    date           TEXT PRIMARY KEY,
    realized_pnl   REAL NOT NULL DEFAULT 0,
    unrealized_pnl REAL,
    trades_taken   INTEGER NOT NULL DEFAULT 0,
    wins           INTEGER NOT NULL DEFAULT 0,
    losses         INTEGER NOT NULL DEFAULT 0,
    equity_start   REAL,
    equity_end     REAL,
    max_drawdown   REAL
);

CREATE TABLE IF NOT EXISTS bot_state (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// One row of the trades table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,
    pub entry_time: String,
    pub exit_time: Option<String>,
    pub ticker: String,
    pub direction: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub commission: f64,
    pub pnl: Option<f64>,
    pub pnl_pct: Option<f64>,
    pub exit_reason: Option<String>,
    pub signal_reason: Option<String>,
}

/// Aggregate statistics over closed trades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
}

/// One row of the daily_pnl table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyPnlRecord {
    pub date: String,
    pub realized_pnl: f64,
    pub unrealized_pnl: Option<f64>,
    pub trades_taken: u32,
    pub wins: u32,
    pub losses: u32,
    pub equity_start: Option<f64>,
    pub equity_end: Option<f64>,
    pub max_drawdown: Option<f64>,
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (creating directories and tables as needed).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        conn.execute_batch(CREATE_TABLES)
            .context("failed to create tables")?;
        info!(path = %path.display(), "database connected");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // -------------------------------------------------------------------------
    // Trades
    // -------------------------------------------------------------------------

    /// Append a trade entry. Returns the row id for the matching exit update.
    #[allow(clippy::too_many_arguments)]
    pub fn save_trade_entry(
        &self,
        ticker: &str,
        direction: &str,
        quantity: f64,
        entry_price: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        signal_reason: &str,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trades (entry_time, ticker, direction, quantity, entry_price,
                                 stop_loss, take_profit, signal_reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![now, ticker, direction, quantity, entry_price, stop_loss, take_profit, signal_reason, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Record exit details on an existing trade row.
    pub fn save_trade_exit(
        &self,
        trade_id: i64,
        exit_price: f64,
        pnl: f64,
        pnl_pct: f64,
        exit_reason: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE trades SET exit_time=?1, exit_price=?2, pnl=?3, pnl_pct=?4, exit_reason=?5
             WHERE id=?6",
            params![now, exit_price, pnl, pnl_pct, exit_reason, trade_id],
        )?;
        Ok(())
    }

    /// Trades entered on or after the given date (UTC).
    pub fn get_trades_since(&self, date: NaiveDate, limit: usize) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM trades WHERE entry_time >= ?1 ORDER BY entry_time DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![date.to_string(), limit as i64], row_to_trade)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Most recent trades, newest first.
    pub fn get_trade_history(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM trades ORDER BY entry_time DESC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_trade)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Aggregate statistics over closed trades.
    pub fn get_trade_stats(&self) -> Result<TradeStats> {
        let conn = self.conn.lock();
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN pnl >= 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN pnl < 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(pnl), 0),
                    COALESCE(AVG(pnl), 0),
                    COALESCE(MAX(pnl), 0),
                    COALESCE(MIN(pnl), 0)
             FROM trades WHERE exit_time IS NOT NULL",
            [],
            |row| {
                Ok(TradeStats {
                    total_trades: row.get::<_, i64>(0)? as u32,
                    wins: row.get::<_, i64>(1)? as u32,
                    losses: row.get::<_, i64>(2)? as u32,
                    total_pnl: row.get(3)?,
                    avg_pnl: row.get(4)?,
                    best_trade: row.get(5)?,
                    worst_trade: row.get(6)?,
                })
            },
        )?;
        Ok(stats)
    }

    // -------------------------------------------------------------------------
    // Daily P&L
    // -------------------------------------------------------------------------

    /// Insert or update the daily P&L row for its date.
    pub fn save_daily_pnl(&self, record: &DailyPnlRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO daily_pnl (date, realized_pnl, unrealized_pnl, trades_taken,
                                    wins, losses, equity_start, equity_end, max_drawdown)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(date) DO UPDATE SET
                realized_pnl=?2, unrealized_pnl=?3, trades_taken=?4, wins=?5, losses=?6,
                equity_end=?8, max_drawdown=?9",
            params![
                record.date,
                record.realized_pnl,
                record.unrealized_pnl,
                record.trades_taken,
                record.wins,
                record.losses,
                record.equity_start,
                record.equity_end,
                record.max_drawdown,
            ],
        )?;
        Ok(())
    }

    /// Daily P&L rows for the last `days` days, newest first.
    pub fn get_daily_pnl_history(&self, days: usize) -> Result<Vec<DailyPnlRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM daily_pnl ORDER BY date DESC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![days as i64], |row| {
                Ok(DailyPnlRecord {
                    date: row.get("date")?,
                    realized_pnl: row.get("realized_pnl")?,
                    unrealized_pnl: row.get("unrealized_pnl")?,
                    trades_taken: row.get::<_, i64>("trades_taken")? as u32,
                    wins: row.get::<_, i64>("wins")? as u32,
                    losses: row.get::<_, i64>("losses")? as u32,
                    equity_start: row.get("equity_start")?,
                    equity_end: row.get("equity_end")?,
                    max_drawdown: row.get("max_drawdown")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Bot state
    // -------------------------------------------------------------------------

    /// Save an opaque JSON blob under `key` (upsert).
    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bot_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value=?2, updated_at=?3",
            params![key, value.to_string(), now],
        )?;
        Ok(())
    }

    /// Load a state blob by key.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row("SELECT value FROM bot_state WHERE key=?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    pub fn clear_state(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM bot_state WHERE key=?1", params![key])?;
        Ok(())
    }
}

fn row_to_trade(row: &rusqlite::Row<'_>) -> rusqlite::Result<TradeRecord> {
    Ok(TradeRecord {
        id: row.get("id")?,
        entry_time: row.get("entry_time")?,
        exit_time: row.get("exit_time")?,
        ticker: row.get("ticker")?,
        direction: row.get("direction")?,
        quantity: row.get("quantity")?,
        entry_price: row.get("entry_price")?,
        exit_price: row.get("exit_price")?,
        stop_loss: row.get("stop_loss")?,
        take_profit: row.get("take_profit")?,
        commission: row.get("commission")?,
        pnl: row.get("pnl")?,
        pnl_pct: row.get("pnl_pct")?,
        exit_reason: row.get("exit_reason")?,
        signal_reason: row.get("signal_reason")?,
    })
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_entry_and_exit_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .save_trade_entry("MSTR", "long", 10.0, 200.0, Some(195.0), Some(210.0), "[5m] test")
            .unwrap();
        assert!(id > 0);

        db.save_trade_exit(id, 210.0, 100.0, 5.0, "[5m] take_profit")
            .unwrap();

        let history = db.get_trade_history(10).unwrap();
        assert_eq!(history.len(), 1);
        let trade = &history[0];
        assert_eq!(trade.ticker, "MSTR");
        assert_eq!(trade.direction, "long");
        assert_eq!(trade.exit_price, Some(210.0));
        assert_eq!(trade.pnl, Some(100.0));
        assert_eq!(trade.exit_reason.as_deref(), Some("[5m] take_profit"));
        assert_eq!(trade.stop_loss, Some(195.0));
    }

    #[test]
    fn open_trades_have_no_exit() {
        let db = Database::open_in_memory().unwrap();
        db.save_trade_entry("PLTR", "short", 25.0, 30.0, None, None, "test")
            .unwrap();
        let history = db.get_trade_history(10).unwrap();
        assert_eq!(history[0].exit_time, None);
        assert_eq!(history[0].pnl, None);
    }

    #[test]
    fn trade_stats_aggregate_closed_only() {
        let db = Database::open_in_memory().unwrap();
        let a = db.save_trade_entry("MSTR", "long", 10.0, 100.0, None, None, "").unwrap();
        let b = db.save_trade_entry("MSTR", "long", 10.0, 100.0, None, None, "").unwrap();
        db.save_trade_entry("MSTR", "long", 10.0, 100.0, None, None, "").unwrap(); // open

        db.save_trade_exit(a, 104.0, 40.0, 4.0, "take_profit").unwrap();
        db.save_trade_exit(b, 98.0, -20.0, -2.0, "stop_loss").unwrap();

        let stats = db.get_trade_stats().unwrap();
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.total_pnl, 20.0);
        assert_eq!(stats.best_trade, 40.0);
        assert_eq!(stats.worst_trade, -20.0);
    }

    #[test]
    fn daily_pnl_upserts_on_date() {
        let db = Database::open_in_memory().unwrap();
        let mut record = DailyPnlRecord {
            date: "2026-03-02".to_string(),
            realized_pnl: 150.0,
            unrealized_pnl: None,
            trades_taken: 3,
            wins: 2,
            losses: 1,
            equity_start: Some(60_000.0),
            equity_end: Some(60_150.0),
            max_drawdown: None,
        };
        db.save_daily_pnl(&record).unwrap();

        // Second save for the same date replaces, keeps equity_start.
        record.realized_pnl = 200.0;
        record.trades_taken = 4;
        record.equity_end = Some(60_200.0);
        db.save_daily_pnl(&record).unwrap();

        let history = db.get_daily_pnl_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].realized_pnl, 200.0);
        assert_eq!(history[0].trades_taken, 4);
        assert_eq!(history[0].equity_start, Some(60_000.0));
        assert_eq!(history[0].equity_end, Some(60_200.0));
    }

    #[test]
    fn bot_state_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load_state("positions").unwrap().is_none());

        let value = serde_json::json!({"MSTR": {"qty": 10, "entry": 200.0}});
        db.save_state("positions", &value).unwrap();
        assert_eq!(db.load_state("positions").unwrap(), Some(value.clone()));

        // Upsert replaces.
        let updated = serde_json::json!({"MSTR": {"qty": 5, "entry": 201.0}});
        db.save_state("positions", &updated).unwrap();
        assert_eq!(db.load_state("positions").unwrap(), Some(updated));

        db.clear_state("positions").unwrap();
        assert!(db.load_state("positions").unwrap().is_none());
    }

    #[test]
    fn trades_since_filters_by_date() {
        let db = Database::open_in_memory().unwrap();
        db.save_trade_entry("MSTR", "long", 1.0, 100.0, None, None, "").unwrap();

        let yesterday = Utc::now().date_naive() - chrono::Duration::days(1);
        let tomorrow = Utc::now().date_naive() + chrono::Duration::days(1);
        assert_eq!(db.get_trades_since(yesterday, 50).unwrap().len(), 1);
        assert_eq!(db.get_trades_since(tomorrow, 50).unwrap().len(), 0);
    }
}
