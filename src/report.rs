// =============================================================================
// Daily Report — durable journal of the trading day
// =============================================================================
//
// Accumulates every user-visible event (trades, risk events, order errors,
// status changes) in memory and writes one JSON artifact per day at shutdown.
// Journaling must never block or fail the trading path; save errors are the
// caller's to log.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::AccountSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportEventKind {
    Status,
    TradeEntry,
    TradeExit,
    RiskEvent,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEvent {
    pub at: DateTime<Utc>,
    pub kind: ReportEventKind,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
struct ReportBody {
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    account_start: Option<AccountSnapshot>,
    account_end: Option<AccountSnapshot>,
    trades_opened: u32,
    trades_closed: u32,
    realized_pnl: f64,
    events: Vec<ReportEvent>,
}

/// Thread-safe daily journal shared by every engine and the supervisor.
pub struct DailyReport {
    body: Mutex<ReportBody>,
    dir: PathBuf,
}

impl DailyReport {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            body: Mutex::new(ReportBody {
                started_at: Some(Utc::now()),
                ..ReportBody::default()
            }),
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn push(&self, kind: ReportEventKind, message: String) {
        self.body.lock().events.push(ReportEvent {
            at: Utc::now(),
            kind,
            message,
        });
    }

    pub fn log_status(&self, message: impl Into<String>) {
        self.push(ReportEventKind::Status, message.into());
    }

    pub fn log_risk_event(&self, message: impl Into<String>) {
        self.push(ReportEventKind::RiskEvent, message.into());
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.push(ReportEventKind::Error, message.into());
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_trade_entry(
        &self,
        ticker: &str,
        direction: &str,
        quantity: f64,
        price: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        reason: &str,
    ) {
        let sl = stop_loss.map_or("none".to_string(), |v| format!("${v:.2}"));
        let tp = take_profit.map_or("none".to_string(), |v| format!("${v:.2}"));
        let message = format!(
            "ENTRY {ticker}: {direction} {quantity:.0} @ ${price:.2} (SL: {sl}, TP: {tp}) — {reason}"
        );
        let mut body = self.body.lock();
        body.trades_opened += 1;
        body.events.push(ReportEvent {
            at: Utc::now(),
            kind: ReportEventKind::TradeEntry,
            message,
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_trade_exit(
        &self,
        ticker: &str,
        direction: &str,
        quantity: f64,
        entry_price: f64,
        exit_price: f64,
        pnl: f64,
        pnl_pct: f64,
        reason: &str,
    ) {
        let result = if pnl >= 0.0 { "WIN" } else { "LOSS" };
        let message = format!(
            "EXIT ({result}) {ticker}: {direction} {quantity:.0} @ ${exit_price:.2} \
             (entry: ${entry_price:.2}, P&L: ${pnl:.2} / {pnl_pct:.2}%) — {reason}"
        );
        let mut body = self.body.lock();
        body.trades_closed += 1;
        body.realized_pnl += pnl;
        body.events.push(ReportEvent {
            at: Utc::now(),
            kind: ReportEventKind::TradeExit,
            message,
        });
    }

    pub fn set_account_start(&self, account: AccountSnapshot) {
        self.body.lock().account_start = Some(account);
    }

    pub fn set_account_end(&self, account: AccountSnapshot) {
        self.body.lock().account_end = Some(account);
    }

    pub fn event_count(&self) -> usize {
        self.body.lock().events.len()
    }

    pub fn realized_pnl(&self) -> f64 {
        self.body.lock().realized_pnl
    }

    /// Write the report artifact and return its path.
    pub fn save(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let mut body = self.body.lock();
        body.finished_at = Some(Utc::now());

        let date = Utc::now().format("%Y-%m-%d");
        let path = self.dir.join(format!("daily_report_{date}.json"));
        let json = serde_json::to_string_pretty(&*body).context("failed to serialise report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;

        info!(path = %path.display(), events = body.events.len(), "daily report saved");
        Ok(path)
    }
}

impl std::fmt::Debug for DailyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = self.body.lock();
        f.debug_struct("DailyReport")
            .field("events", &body.events.len())
            .field("trades_opened", &body.trades_opened)
            .field("trades_closed", &body.trades_closed)
            .finish()
    }
}
