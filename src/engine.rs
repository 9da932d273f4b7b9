// =============================================================================
// Multi-Timeframe Engine — one per symbol, owns the position
// =============================================================================
//
// Runs the same strategy on multiple bar timeframes for a single symbol.
// Each timeframe lives in a slot (strategy instance + indicator frame +
// signal buffer); slots process bars independently, and when entry signals
// appear the engine scores the fresh ones and trades at most the best.
//
// Gating and scoring, higher is better:
//   hard gates   — long with RSI > 80 / short with RSI < 20; fewer than two
//                  timeframes agreeing on direction (floor counted before
//                  RSI rejection, including the candidate itself)
//   score        — ADX strength, risk:reward from stop/target, lower-
//                  timeframe preference, agreement bonus (non-rejected
//                  candidates only), RSI quality band
//
// The engine is driven through a per-symbol command mailbox consumed by a
// single task, so bar handling, reconciliation, and pause/resume are
// linearized without global locks. Close signals always route to the broker,
// even while risk is paused.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::broker::{Broker, BrokerError};
use crate::config::SizingMode;
use crate::frame::{IndicatorFrame, Row};
use crate::position::Position;
use crate::reconcile::{adopt_broker_position, reconcile_positions, ReconcileOutcome, ReconcileReport};
use crate::report::DailyReport;
use crate::risk::RiskManager;
use crate::storage::Database;
use crate::strategy::Strategy;
use crate::types::{format_timeframe, Bar, Direction, Order, Signal, SignalKind, Trade};

/// Buffered entry signals go stale after this many seconds.
const SIGNAL_FRESHNESS_SECS: i64 = 120;

/// Hard-reject sentinel: the candidate is categorically excluded.
const HARD_REJECT: f64 = f64::NEG_INFINITY;

/// ADX assumed when the strategy computed none (weak trend).
const DEFAULT_ADX: f64 = 15.0;

/// Heartbeat log cadence, in bars across all slots.
const HEARTBEAT_BARS: u64 = 20;

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// An entry signal buffered for arbitration, with the row it fired on.
#[derive(Debug, Clone)]
struct BufferedSignal {
    signal: Signal,
    row: Row,
    at: DateTime<Utc>,
}

/// One timeframe's state: strategy instance + rolling frame + signal buffer.
pub struct TimeframeSlot {
    pub timeframe: u32,
    pub strategy: Box<dyn Strategy>,
    pub frame: IndicatorFrame,
    pub bar_count: u64,
    last_signal: Option<BufferedSignal>,
}

impl TimeframeSlot {
    pub fn new(timeframe: u32, strategy: Box<dyn Strategy>, frame: IndicatorFrame) -> Self {
        Self {
            timeframe,
            strategy,
            frame,
            bar_count: 0,
            last_signal: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

/// Position-sizing knobs, copied from the config at engine construction.
#[derive(Debug, Clone, Copy)]
pub struct SizingParams {
    pub mode: SizingMode,
    pub pct_equity: f64,
    pub fixed_size: f64,
    pub risk_pct: f64,
}

/// Desired position value by sizing mode, capped by the risk manager's
/// remaining exposure capacity and by available Reg-T buying power. The
/// final quantity is floor(value / price), at least one share.
pub(crate) fn size_order(
    sizing: &SizingParams,
    risk: &RiskManager,
    signal: &Signal,
    symbol: &str,
    price: f64,
    account: &crate::types::AccountSnapshot,
) -> f64 {
    let equity = account.equity;

    let mut desired = match sizing.mode {
        SizingMode::Fixed => sizing.fixed_size,
        SizingMode::Percent => equity * sizing.pct_equity,
        SizingMode::RiskBased => match signal.stop_loss {
            Some(stop) => {
                let stop_dist = (price - stop).abs();
                if stop_dist > 0.0 {
                    (equity * sizing.risk_pct / stop_dist) * price
                } else {
                    equity * sizing.risk_pct
                }
            }
            None => equity * sizing.risk_pct,
        },
    };

    // Exposure cap across all symbols.
    let remaining = risk.remaining_capacity(equity);
    if desired > remaining {
        info!(
            symbol,
            desired,
            remaining,
            "position sized down to exposure capacity"
        );
        desired = remaining;
    }

    // Reg-T buying power cap.
    let current_exposure = risk.total_exposure();
    let regt_bp = if account.regt_buying_power > 0.0 {
        account.regt_buying_power
    } else {
        equity * 2.0
    };
    let available_bp = regt_bp - current_exposure;
    if desired > available_bp && available_bp > 0.0 {
        info!(
            symbol,
            desired,
            available_bp,
            regt_bp,
            "position sized down to buying power"
        );
        desired = available_bp;
    }

    (desired / price).floor().max(1.0)
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// ADX from the signal row, trying the common periods. Missing defaults to a
/// weak-trend reading.
fn row_adx(row: &Row) -> f64 {
    for col in ["ADX_14", "ADX_10", "ADX_20"] {
        if let Some(val) = row.get(col) {
            return val;
        }
    }
    DEFAULT_ADX
}

/// RSI from the signal row. Missing disables the RSI gate and quality band.
fn row_rsi(row: &Row) -> Option<f64> {
    for col in ["RSI_9", "RSI_14", "RSI_7"] {
        if let Some(val) = row.get(col) {
            return Some(val);
        }
    }
    None
}

/// Whether the RSI extreme gate categorically excludes this signal.
fn rsi_rejected(signal: &Signal, row: &Row) -> bool {
    match (signal.kind, row_rsi(row)) {
        (SignalKind::OpenLong, Some(rsi)) => rsi > 80.0,
        (SignalKind::OpenShort, Some(rsi)) => rsi < 20.0,
        _ => false,
    }
}

/// Score an entry candidate. `agreement_total` counts all fresh
/// same-direction signals (the floor, measured before RSI rejection);
/// `agreement_clean` counts only non-rejected ones (the bonus).
pub(crate) fn score_entry(
    signal: &Signal,
    row: &Row,
    tf_minutes: u32,
    agreement_total: u32,
    agreement_clean: u32,
) -> f64 {
    let rsi = row_rsi(row);

    // Hard gate: RSI extremes. No scoring needed.
    if rsi_rejected(signal, row) {
        return HARD_REJECT;
    }

    // Hard gate: lone signals are noise; require a second timeframe.
    if agreement_total < 2 {
        return HARD_REJECT;
    }

    let mut score = 0.0;

    // 1. ADX strength (max ~40 points).
    let adx = row_adx(row);
    score += if adx > 25.0 {
        adx.min(40.0)
    } else if adx > 20.0 {
        adx * 0.5
    } else {
        adx * 0.2
    };

    // 2. Risk:reward (max ~30 points, cap at 3:1).
    if let (Some(stop), Some(target)) = (signal.stop_loss, signal.take_profit) {
        let price = row.close();
        let risk = (price - stop).abs();
        let reward = (target - price).abs();
        if risk > 0.0 {
            score += (reward / risk * 10.0).min(30.0);
        }
    }

    // 3. Timeframe preference: tighter stops and faster entries.
    score += (20.0 - tf_minutes as f64 * 1.5).max(0.0);

    // 4. Agreement bonus: 15 points per extra confirming timeframe.
    score += 15.0 * agreement_clean.saturating_sub(1) as f64;

    // 5. RSI quality band.
    if let Some(rsi) = rsi {
        score += match signal.kind {
            SignalKind::OpenLong => {
                if rsi < 70.0 {
                    10.0
                } else if rsi < 75.0 {
                    5.0
                } else {
                    -5.0
                }
            }
            SignalKind::OpenShort => {
                if rsi > 30.0 {
                    10.0
                } else if rsi > 25.0 {
                    5.0
                } else {
                    -5.0
                }
            }
            _ => 0.0,
        };
    }

    score
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct MultiTimeframeEngine {
    symbol: String,
    slots: Vec<TimeframeSlot>,
    broker: Arc<dyn Broker>,
    risk: Arc<RiskManager>,
    db: Option<Arc<Database>>,
    report: Arc<DailyReport>,
    sizing: SizingParams,
    long_only: bool,

    position: Option<Position>,
    active_timeframe: Option<u32>,
    current_trade_db_id: Option<i64>,
    active: bool,
    total_bars: u64,
}

impl MultiTimeframeEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        slots: Vec<TimeframeSlot>,
        broker: Arc<dyn Broker>,
        risk: Arc<RiskManager>,
        db: Option<Arc<Database>>,
        report: Arc<DailyReport>,
        sizing: SizingParams,
        long_only: bool,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            slots,
            broker,
            risk,
            db,
            report,
            sizing,
            long_only,
            position: None,
            active_timeframe: None,
            current_trade_db_id: None,
            active: true,
            total_bars: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn pause(&mut self) {
        self.active = false;
        warn!(symbol = %self.symbol, "trading paused");
    }

    pub fn resume(&mut self) {
        self.active = true;
        info!(symbol = %self.symbol, "trading resumed");
    }

    // -------------------------------------------------------------------------
    // Bar handling
    // -------------------------------------------------------------------------

    /// Process a bar for one timeframe. Strictly sequential per symbol; the
    /// mailbox guarantees no interleaving with reconciliation.
    pub async fn on_bar(&mut self, symbol: &str, timeframe: u32, bar: Bar) {
        if !self.active || symbol != self.symbol {
            return;
        }
        let Some(slot_idx) = self.slots.iter().position(|s| s.timeframe == timeframe) else {
            return;
        };

        self.total_bars += 1;

        // Append and refresh indicators.
        let row = {
            let slot = &mut self.slots[slot_idx];
            slot.bar_count += 1;
            slot.frame.push_bar(bar);
            if let Err(e) = slot.strategy.setup(&mut slot.frame) {
                error!(symbol = %self.symbol, timeframe, error = %e, "indicator error");
                return;
            }
            match slot.frame.last_row() {
                Some(row) => row,
                None => return,
            }
        };

        // Local stop/target safety net, active timeframe only.
        if self.position.is_some() && self.active_timeframe == Some(timeframe) {
            self.check_stops(&bar, timeframe).await;
        }

        // Trailing stop ratchets from this bar's close.
        if self.active_timeframe == Some(timeframe) {
            if let Some(position) = self.position.as_mut() {
                position.update_trailing_stop(row.close());
            }
        }

        // Strategy signal.
        let signal = match self.slots[slot_idx]
            .strategy
            .on_bar(row.index, &row, self.position.as_ref())
        {
            Ok(signal) => signal,
            Err(e) => {
                error!(symbol = %self.symbol, timeframe, error = %e, "strategy error");
                return;
            }
        };

        if let Some(signal) = signal {
            let blocked_short = self.long_only
                && matches!(signal.kind, SignalKind::OpenShort | SignalKind::CloseShort);
            if !blocked_short {
                if signal.kind.is_exit() {
                    if self.position.is_some() {
                        self.close_position(&signal, timeframe).await;
                    }
                } else {
                    self.slots[slot_idx].last_signal = Some(BufferedSignal {
                        signal,
                        row: row.clone(),
                        at: Utc::now(),
                    });
                    self.evaluate_entries().await;
                }
            }
        }

        // Heartbeat.
        if self.total_bars % HEARTBEAT_BARS == 0 {
            let position = match (&self.position, self.active_timeframe) {
                (Some(pos), Some(tf)) => format!(
                    "{} @ ${:.2} (via {})",
                    pos.direction(),
                    pos.entry_price(),
                    format_timeframe(tf)
                ),
                (Some(pos), None) => format!("{} @ ${:.2}", pos.direction(), pos.entry_price()),
                _ => "flat".to_string(),
            };
            info!(
                symbol = %self.symbol,
                bar = self.total_bars,
                close = row.close(),
                position = %position,
                "heartbeat"
            );
        }
    }

    // -------------------------------------------------------------------------
    // Entry arbitration
    // -------------------------------------------------------------------------

    /// Score every fresh buffered signal and trade at most the best one.
    /// All buffers are cleared afterwards regardless of outcome.
    async fn evaluate_entries(&mut self) {
        if self.position.is_some() {
            for slot in &mut self.slots {
                slot.last_signal = None;
            }
            return;
        }

        let now = Utc::now();
        let mut best: Option<(usize, f64)> = None;

        for idx in 0..self.slots.len() {
            let slot = &self.slots[idx];
            let Some(buffered) = slot.last_signal.as_ref() else {
                continue;
            };
            if !is_fresh(buffered, now) {
                continue;
            }

            let (total, clean) = self.agreement_counts(buffered.signal.kind, now);
            let score = score_entry(&buffered.signal, &buffered.row, slot.timeframe, total, clean);

            info!(
                symbol = %self.symbol,
                timeframe = %format_timeframe(slot.timeframe),
                direction = %buffered.signal.kind,
                score,
                adx = row_adx(&buffered.row),
                reason = %buffered.signal.reason,
                "entry candidate scored"
            );

            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }

        if let Some((idx, score)) = best {
            if score > 0.0 {
                let timeframe = self.slots[idx].timeframe;
                let buffered = self.slots[idx].last_signal.clone();
                if let Some(buffered) = buffered {
                    info!(
                        symbol = %self.symbol,
                        timeframe = %format_timeframe(timeframe),
                        score,
                        "best timeframe selected"
                    );
                    self.open_position(&buffered.signal, &buffered.row, timeframe)
                        .await;
                }
            } else {
                info!(
                    symbol = %self.symbol,
                    best_score = score,
                    "all entry candidates blocked or below threshold"
                );
            }
        }

        for slot in &mut self.slots {
            slot.last_signal = None;
        }
    }

    /// Fresh same-direction signal counts: `(all, non-RSI-rejected)`. Both
    /// include the candidate under evaluation.
    fn agreement_counts(&self, kind: SignalKind, now: DateTime<Utc>) -> (u32, u32) {
        let mut total = 0;
        let mut clean = 0;
        for slot in &self.slots {
            if let Some(buffered) = &slot.last_signal {
                if is_fresh(buffered, now) && buffered.signal.kind == kind {
                    total += 1;
                    if !rsi_rejected(&buffered.signal, &buffered.row) {
                        clean += 1;
                    }
                }
            }
        }
        (total, clean)
    }

    // -------------------------------------------------------------------------
    // Open path
    // -------------------------------------------------------------------------

    async fn open_position(&mut self, signal: &Signal, row: &Row, timeframe: u32) {
        if self.position.is_some() {
            return;
        }
        let price = row.close();
        let tf_label = format_timeframe(timeframe);

        // Account snapshot. Broker unavailability is transient: skip this
        // bar's action and let the reconciler repair any divergence later.
        let account = match self.broker.get_account().await {
            Ok(account) => account,
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "account fetch failed, skipping entry");
                return;
            }
        };

        // Risk admission.
        let (allowed, reason) = self.risk.check_new_order(
            signal,
            &self.symbol,
            price,
            account.equity,
            account.buying_power,
            Some(&account),
        );
        if !allowed {
            warn!(symbol = %self.symbol, reason = %reason, "order blocked by risk manager");
            self.report
                .log_risk_event(format!("{}: Order blocked — {reason}", self.symbol));
            return;
        }

        let quantity = size_order(&self.sizing, &self.risk, signal, &self.symbol, price, &account);

        let order = Order {
            timestamp: Utc::now(),
            symbol: self.symbol.clone(),
            kind: signal.kind,
            quantity,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            reason: signal.reason.clone(),
        };

        let trade = match self.broker.submit_order(&order).await {
            Ok(trade) => trade,
            Err(BrokerError::OrderRejected(reason)) => {
                error!(symbol = %self.symbol, reason = %reason, "order rejected");
                self.report
                    .log_error(format!("{}: Order rejected — {reason}", self.symbol));
                return;
            }
            Err(e) => {
                error!(symbol = %self.symbol, error = %e, "order submission failed");
                self.report
                    .log_error(format!("{}: Order error — {e}", self.symbol));
                return;
            }
        };

        let position_value = trade.quantity * trade.entry_price;
        self.position = Some(Position::new(
            trade.clone(),
            signal.stop_loss,
            signal.take_profit,
            signal.trailing_stop_distance,
        ));
        self.active_timeframe = Some(timeframe);

        self.risk.record_trade_opened(&self.symbol, position_value);

        if let Some(db) = &self.db {
            match db.save_trade_entry(
                &self.symbol,
                &trade.direction.to_string(),
                trade.quantity,
                trade.entry_price,
                signal.stop_loss,
                signal.take_profit,
                &format!("[{tf_label}] {}", signal.reason),
            ) {
                Ok(id) => self.current_trade_db_id = Some(id),
                Err(e) => error!(symbol = %self.symbol, error = %e, "trade entry persist failed"),
            }
        }

        info!(
            symbol = %self.symbol,
            timeframe = %tf_label,
            direction = %trade.direction,
            qty = trade.quantity,
            price = trade.entry_price,
            stop_loss = ?signal.stop_loss,
            take_profit = ?signal.take_profit,
            reason = %signal.reason,
            "ENTRY"
        );

        self.report.log_trade_entry(
            &self.symbol,
            &trade.direction.to_string(),
            trade.quantity,
            trade.entry_price,
            signal.stop_loss,
            signal.take_profit,
            &format!("[{tf_label}] {}", signal.reason),
        );
    }

    // -------------------------------------------------------------------------
    // Close path
    // -------------------------------------------------------------------------

    /// Flatten through the broker. Always attempted when a position exists —
    /// exits never consult risk admission.
    async fn close_position(&mut self, signal: &Signal, timeframe: u32) {
        let Some(position) = self.position.as_ref() else {
            return;
        };
        let tf_label = format_timeframe(timeframe);

        let close_trade = match self.broker.close_position(&self.symbol).await {
            Ok(Some(trade)) => trade,
            Ok(None) => {
                // Broker already flat; drop local state.
                self.position = None;
                self.active_timeframe = None;
                return;
            }
            Err(e) => {
                error!(symbol = %self.symbol, error = %e, "failed to close position");
                return;
            }
        };

        let exit_price = close_trade.entry_price;
        let entry_price = position.entry_price();
        let quantity = position.quantity();
        let direction = position.direction();

        let pnl = match direction {
            Direction::Long => (exit_price - entry_price) * quantity,
            Direction::Short => (entry_price - exit_price) * quantity,
        };
        let pnl_pct = if entry_price > 0.0 {
            (pnl / (entry_price * quantity)) * 100.0
        } else {
            0.0
        };
        let result = if pnl >= 0.0 { "WIN" } else { "LOSS" };
        let reason = if signal.reason.is_empty() {
            "strategy_exit".to_string()
        } else {
            signal.reason.clone()
        };

        self.risk.record_trade_closed(&self.symbol, pnl);
        if self.risk.is_paused() {
            self.pause();
            self.report
                .log_risk_event(format!("Trading paused: {}", self.risk.pause_reason()));
        }

        if let (Some(db), Some(trade_id)) = (&self.db, self.current_trade_db_id) {
            if let Err(e) = db.save_trade_exit(
                trade_id,
                exit_price,
                pnl,
                pnl_pct,
                &format!("[{tf_label}] {reason}"),
            ) {
                error!(symbol = %self.symbol, error = %e, "trade exit persist failed");
            }
            self.current_trade_db_id = None;
        }

        info!(
            symbol = %self.symbol,
            timeframe = %tf_label,
            result,
            direction = %direction,
            qty = quantity,
            exit_price,
            entry_price,
            pnl,
            reason = %reason,
            "EXIT"
        );

        self.report.log_trade_exit(
            &self.symbol,
            &direction.to_string(),
            quantity,
            entry_price,
            exit_price,
            pnl,
            pnl_pct,
            &format!("[{tf_label}] {reason}"),
        );

        // Notify every slot's strategy with the closed trade.
        let mut closed = self.position.take().expect("position checked above").trade;
        closed.close(Utc::now(), exit_price, reason);
        for slot in &mut self.slots {
            slot.strategy.on_trade_closed(&closed);
        }
        self.active_timeframe = None;
    }

    // -------------------------------------------------------------------------
    // Local stop/target safety net
    // -------------------------------------------------------------------------

    async fn check_stops(&mut self, bar: &Bar, timeframe: u32) {
        let Some(position) = self.position.as_ref() else {
            return;
        };
        if let Some(trigger) = position.first_exit(bar) {
            info!(
                symbol = %self.symbol,
                timeframe = %format_timeframe(timeframe),
                trigger = trigger.reason(),
                "protective level hit"
            );
            let close = Signal::close(position.direction(), trigger.reason());
            self.close_position(&close, timeframe).await;
        }
    }

    // -------------------------------------------------------------------------
    // Reconciliation
    // -------------------------------------------------------------------------

    /// Compare local position state against the broker and repair one-sided
    /// divergence. Shares the mailbox with bar handling, so it can never
    /// interleave with an in-flight entry or exit.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport, BrokerError> {
        let broker_pos = self.broker.get_position(&self.symbol).await?;
        let report = reconcile_positions(&self.symbol, self.position.as_ref(), broker_pos.as_ref());

        match report.outcome {
            ReconcileOutcome::AdoptBroker => {
                if let Some(broker_pos) = broker_pos.as_ref() {
                    self.position = Some(adopt_broker_position(broker_pos));
                    // No slot owns an adopted position; the strategy
                    // reasserts stops on its next bar.
                    self.active_timeframe = None;
                }
            }
            ReconcileOutcome::ClearLocal => {
                self.position = None;
                self.active_timeframe = None;
            }
            ReconcileOutcome::Mismatch => {
                self.report.log_risk_event(report.details.clone());
            }
            ReconcileOutcome::AgreeFlat | ReconcileOutcome::AgreeMatch => {}
        }

        if !report.outcome.is_match() {
            warn!(symbol = %self.symbol, outcome = %report.outcome, details = %report.details, "reconciliation");
        }
        Ok(report)
    }
}

fn is_fresh(buffered: &BufferedSignal, now: DateTime<Utc>) -> bool {
    now - buffered.at < TimeDelta::seconds(SIGNAL_FRESHNESS_SECS)
}

// ---------------------------------------------------------------------------
// Command mailbox
// ---------------------------------------------------------------------------

/// Commands linearized through a symbol's mailbox.
#[derive(Debug)]
pub enum EngineCommand {
    Bar { timeframe: u32, bar: Bar },
    Reconcile,
    Pause,
    Resume,
    Shutdown,
}

/// Handle to a running engine task.
#[derive(Clone)]
pub struct EngineHandle {
    pub symbol: String,
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn send(&self, command: EngineCommand) {
        if self.tx.send(command).await.is_err() {
            warn!(symbol = %self.symbol, "engine mailbox closed");
        }
    }

    pub async fn bar(&self, timeframe: u32, bar: Bar) {
        self.send(EngineCommand::Bar { timeframe, bar }).await;
    }

    pub async fn reconcile(&self) {
        self.send(EngineCommand::Reconcile).await;
    }

    pub async fn pause(&self) {
        self.send(EngineCommand::Pause).await;
    }

    pub async fn shutdown(&self) {
        self.send(EngineCommand::Shutdown).await;
    }
}

impl MultiTimeframeEngine {
    /// Move the engine onto its own task, returning the mailbox handle.
    /// One ordered mailbox per symbol realizes "sequential within a symbol,
    /// parallel across symbols".
    pub fn spawn(self) -> EngineHandle {
        let symbol = self.symbol.clone();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_engine(self, rx));
        EngineHandle { symbol, tx }
    }
}

async fn run_engine(mut engine: MultiTimeframeEngine, mut rx: mpsc::Receiver<EngineCommand>) {
    let symbol = engine.symbol.clone();
    while let Some(command) = rx.recv().await {
        match command {
            EngineCommand::Bar { timeframe, bar } => {
                engine.on_bar(&symbol, timeframe, bar).await;
            }
            EngineCommand::Reconcile => {
                if let Err(e) = engine.reconcile().await {
                    error!(symbol = %symbol, error = %e, "reconciliation error");
                }
            }
            EngineCommand::Pause => engine.pause(),
            EngineCommand::Resume => engine.resume(),
            EngineCommand::Shutdown => break,
        }
    }
    info!(symbol = %symbol, "engine task stopped");
}
