// =============================================================================
// Risk Manager — account-level admission control and daily accounting
// =============================================================================
//
// Sits between strategy signals and the broker. Every entry order must pass
// `check_new_order` before submission; close signals are always admitted (the
// system must always be able to exit).
//
// Limits enforced, in decision order (first failure wins):
//   broker trading_blocked, PDT equity floor, daily loss limit, drawdown
//   circuit breaker, one position per symbol, total position count, total
//   exposure cap, single-share value cap, Reg-T buying power, market hours.
//
// Daily counters reset when the broker-local (ET) date rolls over; the
// daily-loss pause auto-resumes at rollover, every other pause is manual.
// All mutable state lives behind one lock — callers never coordinate.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::session::SessionFilter;
use crate::types::{AccountSnapshot, Signal};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Snapshot of the day's trading statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub daily_pnl: f64,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub is_paused: bool,
    pub pause_reason: String,
}

// ---------------------------------------------------------------------------
// Internal mutable state (behind RwLock)
// ---------------------------------------------------------------------------

struct Inner {
    peak_equity: f64,
    daily_pnl: f64,
    daily_trades: u32,
    daily_wins: u32,
    daily_losses: u32,
    current_day: NaiveDate,
    paused: bool,
    pause_reason: String,
    /// symbol -> estimated position value (qty * entry price).
    open_positions: HashMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Risk Manager
// ---------------------------------------------------------------------------

pub struct RiskManager {
    state: RwLock<Inner>,
    config: RiskConfig,
    session: SessionFilter,
}

impl RiskManager {
    pub fn new(config: RiskConfig, initial_equity: f64, session: SessionFilter) -> Self {
        let today = session.market_date(Utc::now());
        info!(
            initial_equity,
            max_daily_loss = config.max_daily_loss,
            max_drawdown_pct = config.max_drawdown_pct,
            max_total_positions = config.max_total_positions,
            max_total_exposure_pct = config.max_total_exposure_pct,
            min_equity = config.min_equity_for_trading,
            "risk manager initialised"
        );

        Self {
            state: RwLock::new(Inner {
                peak_equity: initial_equity,
                daily_pnl: 0.0,
                daily_trades: 0,
                daily_wins: 0,
                daily_losses: 0,
                current_day: today,
                paused: false,
                pause_reason: String::new(),
                open_positions: HashMap::new(),
            }),
            config,
            session,
        }
    }

    // -------------------------------------------------------------------------
    // Pre-trade gate
    // -------------------------------------------------------------------------

    /// Validate an order against all risk limits.
    ///
    /// Returns `(allowed, reason)`; when `allowed` is false the order must be
    /// blocked. Called after `Strategy::on_bar` returns a signal, before
    /// broker submission.
    pub fn check_new_order(
        &self,
        signal: &Signal,
        symbol: &str,
        price: f64,
        equity: f64,
        buying_power: f64,
        account: Option<&AccountSnapshot>,
    ) -> (bool, String) {
        self.check_new_order_at(signal, symbol, price, equity, buying_power, account, Utc::now())
    }

    /// Clock-injectable variant of [`check_new_order`].
    #[allow(clippy::too_many_arguments)]
    pub fn check_new_order_at(
        &self,
        signal: &Signal,
        symbol: &str,
        price: f64,
        equity: f64,
        buying_power: f64,
        account: Option<&AccountSnapshot>,
        now: DateTime<Utc>,
    ) -> (bool, String) {
        // 1. Reset daily counters if the broker-local date rolled over.
        self.roll_day_if_needed(self.session.market_date(now));

        // 2. Close signals are always admitted.
        if signal.kind.is_exit() {
            return (true, "exit_allowed".to_string());
        }

        let mut s = self.state.write();

        // 3. Already paused?
        if s.paused {
            return (false, format!("Trading paused: {}", s.pause_reason));
        }

        // 4. Trading blocked by the broker.
        if account.is_some_and(|a| a.trading_blocked) {
            let reason = "Trading blocked by broker".to_string();
            Self::pause_locked(&mut s, reason.clone());
            return (false, reason);
        }

        // 5. Equity below the PDT floor.
        let min_equity = self.config.min_equity_for_trading;
        if min_equity > 0.0 && equity < min_equity {
            let reason = format!(
                "Equity ${equity:.2} below minimum ${min_equity:.2} \
                 (PDT threshold, day trade restrictions)"
            );
            Self::pause_locked(&mut s, reason.clone());
            return (false, reason);
        }

        // 6. Daily loss limit. The abs() guard keeps a zero-configured limit
        //    from tripping on a flat day.
        if s.daily_pnl.abs() > 0.0 && s.daily_pnl <= -self.config.max_daily_loss {
            let reason = format!("Daily loss limit hit: ${:.2}", s.daily_pnl);
            Self::pause_locked(&mut s, reason.clone());
            return (false, reason);
        }

        // 7. Drawdown circuit breaker. Peak equity only ever rises.
        if equity > s.peak_equity {
            s.peak_equity = equity;
        }
        let drawdown_pct = ((s.peak_equity - equity) / s.peak_equity) * 100.0;
        if drawdown_pct >= self.config.max_drawdown_pct {
            let reason = format!(
                "Drawdown circuit breaker: {drawdown_pct:.1}% (limit: {:.1}%)",
                self.config.max_drawdown_pct
            );
            Self::pause_locked(&mut s, reason.clone());
            return (false, reason);
        }

        // 8. One position per symbol.
        if s.open_positions.contains_key(symbol) {
            return (false, format!("Already in position for {symbol}"));
        }

        // 9. Total position count.
        let total_open = s.open_positions.len() as u32;
        if total_open >= self.config.max_total_positions {
            let open_symbols: Vec<&str> =
                s.open_positions.keys().map(String::as_str).collect();
            return (
                false,
                format!(
                    "Max total positions reached: {total_open}/{} ({})",
                    self.config.max_total_positions,
                    open_symbols.join(", ")
                ),
            );
        }

        // 10. Total exposure cap.
        let current_exposure: f64 = s.open_positions.values().sum();
        let max_total_exposure = equity * self.config.max_total_exposure_pct;
        if current_exposure >= max_total_exposure {
            return (
                false,
                format!(
                    "Max total exposure reached: ${current_exposure:.0} / ${max_total_exposure:.0}"
                ),
            );
        }

        // 11. A single share must fit within the position value cap.
        let max_value = equity * self.config.max_position_value_pct;
        if price > max_value {
            return (
                false,
                format!("Single share (${price:.2}) exceeds max position value (${max_value:.2})"),
            );
        }

        // 12. Reg-T buying power (avoids margin calls on overnight holds).
        if self.config.enforce_buying_power {
            if let Some(account) = account {
                let regt_bp = if account.regt_buying_power > 0.0 {
                    account.regt_buying_power
                } else {
                    buying_power
                };
                let available_bp = regt_bp - current_exposure;
                if available_bp <= 0.0 {
                    return (
                        false,
                        format!(
                            "Insufficient buying power: Reg-T BP ${regt_bp:.0}, \
                             current exposure ${current_exposure:.0}"
                        ),
                    );
                }
            }
        }

        // 13. Session filter.
        if self.config.enforce_market_hours && !self.session.is_market_hours_at(now) {
            return (false, "Outside market hours".to_string());
        }

        (true, "approved".to_string())
    }

    // -------------------------------------------------------------------------
    // Accounting
    // -------------------------------------------------------------------------

    /// Track that a position was opened with its estimated value (qty * price).
    pub fn record_trade_opened(&self, symbol: &str, position_value: f64) {
        let mut s = self.state.write();
        s.open_positions.insert(symbol.to_string(), position_value);
        s.daily_trades += 1;

        let total_exposure: f64 = s.open_positions.values().sum();
        info!(
            symbol,
            position_value,
            open_positions = s.open_positions.len(),
            total_exposure,
            "position opened"
        );
    }

    /// Update daily P&L and position tracking after a trade closes. Pauses
    /// trading if the daily loss limit is newly breached.
    pub fn record_trade_closed(&self, symbol: &str, pnl: f64) {
        self.record_trade_closed_at(symbol, pnl, Utc::now());
    }

    /// Clock-injectable variant of [`record_trade_closed`].
    pub fn record_trade_closed_at(&self, symbol: &str, pnl: f64, now: DateTime<Utc>) {
        self.roll_day_if_needed(self.session.market_date(now));

        let mut s = self.state.write();
        s.open_positions.remove(symbol);
        s.daily_pnl += pnl;

        if pnl >= 0.0 {
            s.daily_wins += 1;
        } else {
            s.daily_losses += 1;
        }

        info!(
            symbol,
            pnl,
            daily_pnl = s.daily_pnl,
            wins = s.daily_wins,
            losses = s.daily_losses,
            "trade closed"
        );

        if s.daily_pnl <= -self.config.max_daily_loss {
            let reason = format!(
                "Daily loss limit hit: ${:.2} (limit: -${:.2})",
                s.daily_pnl, self.config.max_daily_loss
            );
            Self::pause_locked(&mut s, reason);
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Remaining $ capacity for new positions under the total exposure cap.
    /// Engines use this to scale sizes; always >= 0.
    pub fn remaining_capacity(&self, equity: f64) -> f64 {
        let s = self.state.read();
        let current_exposure: f64 = s.open_positions.values().sum();
        (equity * self.config.max_total_exposure_pct - current_exposure).max(0.0)
    }

    /// Current total $ exposure across all symbols. Engines consult this for
    /// the buying-power sizing cap instead of reading the positions map.
    pub fn total_exposure(&self) -> f64 {
        self.state.read().open_positions.values().sum()
    }

    pub fn open_position_count(&self) -> usize {
        self.state.read().open_positions.len()
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.state.read().open_positions.contains_key(symbol)
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().paused
    }

    pub fn pause_reason(&self) -> String {
        self.state.read().pause_reason.clone()
    }

    /// Current daily trading statistics.
    pub fn daily_stats(&self) -> DailyStats {
        self.daily_stats_at(Utc::now())
    }

    pub fn daily_stats_at(&self, now: DateTime<Utc>) -> DailyStats {
        self.roll_day_if_needed(self.session.market_date(now));
        let s = self.state.read();
        DailyStats {
            date: s.current_day,
            daily_pnl: s.daily_pnl,
            trades: s.daily_trades,
            wins: s.daily_wins,
            losses: s.daily_losses,
            is_paused: s.paused,
            pause_reason: s.pause_reason.clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Pause / resume
    // -------------------------------------------------------------------------

    /// Manually resume trading after a pause. Only the daily-loss pause
    /// auto-resumes (at day rollover); everything else comes through here.
    pub fn resume(&self) {
        let mut s = self.state.write();
        if s.paused {
            info!(was_paused_for = %s.pause_reason, "trading resumed");
            s.paused = false;
            s.pause_reason.clear();
        }
    }

    fn pause_locked(s: &mut Inner, reason: String) {
        if !s.paused {
            warn!(reason = %reason, "trading paused");
            s.paused = true;
            s.pause_reason = reason;
        }
    }

    // -------------------------------------------------------------------------
    // Day rollover
    // -------------------------------------------------------------------------

    /// Reset daily counters when the broker-local date changes. The check is
    /// performed under the read lock first; the write lock re-verifies in
    /// case another caller already rolled the day.
    fn roll_day_if_needed(&self, today: NaiveDate) {
        {
            let s = self.state.read();
            if s.current_day == today {
                return;
            }
        }

        let mut s = self.state.write();
        if s.current_day == today {
            return;
        }

        info!(
            old_date = %s.current_day,
            new_date = %today,
            previous_daily_pnl = s.daily_pnl,
            "new trading day, resetting daily counters"
        );

        s.daily_pnl = 0.0;
        s.daily_trades = 0;
        s.daily_wins = 0;
        s.daily_losses = 0;
        s.current_day = today;

        // Auto-resume on a new day, daily-loss pauses only.
        if s.paused && s.pause_reason.starts_with("Daily loss") {
            info!("daily-loss pause auto-resumed at day rollover");
            s.paused = false;
            s.pause_reason.clear();
        }
    }
}

impl std::fmt::Debug for RiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.read();
        f.debug_struct("RiskManager")
            .field("paused", &s.paused)
            .field("daily_pnl", &s.daily_pnl)
            .field("open_positions", &s.open_positions.len())
            .field("peak_equity", &s.peak_equity)
            .finish()
    }
}
