// =============================================================================
// SuperTrend Momentum — SuperTrend + ADX + RSI + EMA with hardened filters
// =============================================================================
//
// Entry logic, long side (short is symmetric):
//   - SuperTrend bullish, ADX above threshold, RSI in the momentum band
//     (above the minimum, below the overbought cap)
//   - Bullish candle, price above the trend EMA (both relaxed on a fresh
//     SuperTrend flip)
//   - Anti-whipsaw: SuperTrend must hold its direction 2+ bars unless the
//     flip is fresh
//   - ATR floor: skip when volatility is below its own rolling average
//   - Candle body filter: body must exceed 40% of the bar's range
//   - Cooldown: wait N bars after a stop-out before re-entry
//
// Exits on a SuperTrend flip against the position; the session window close
// also flattens. Stops and targets are ATR multiples from the close.
// =============================================================================

use anyhow::Result;
use chrono::Timelike;

use crate::frame::{IndicatorFrame, Row};
use crate::indicators::{adx_series, atr_series, ema_series, rsi_series, sma_series, supertrend_series};
use crate::position::Position;
use crate::strategy::{param, Params, Strategy};
use crate::types::{Direction, Signal, SignalKind, Trade};

pub struct SupertrendMomentum {
    params: Params,
    prev_st_dir: Option<f64>,
    st_dir_count: u32,
    cooldown_remaining: u32,
}

impl SupertrendMomentum {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            prev_st_dir: None,
            st_dir_count: 0,
            cooldown_remaining: 0,
        }
    }

    fn st_length(&self) -> usize {
        param(&self.params, "st_length", 7.0) as usize
    }

    fn st_multiplier(&self) -> f64 {
        param(&self.params, "st_multiplier", 2.5)
    }

    fn adx_length(&self) -> usize {
        param(&self.params, "adx_length", 14.0) as usize
    }

    fn rsi_length(&self) -> usize {
        param(&self.params, "rsi_length", 9.0) as usize
    }

    fn atr_length(&self) -> usize {
        param(&self.params, "atr_length", 10.0) as usize
    }

    fn trend_ema(&self) -> usize {
        param(&self.params, "trend_ema", 50.0) as usize
    }

    fn atr_floor_len(&self) -> usize {
        param(&self.params, "atr_floor_len", 20.0) as usize
    }

    fn st_dir_col(&self) -> String {
        format!("SUPERTd_{}_{}", self.st_length(), self.st_multiplier())
    }

    fn st_line_col(&self) -> String {
        format!("SUPERT_{}_{}", self.st_length(), self.st_multiplier())
    }

    fn adx_col(&self) -> String {
        format!("ADX_{}", self.adx_length())
    }

    fn rsi_col(&self) -> String {
        format!("RSI_{}", self.rsi_length())
    }

    fn atr_col(&self) -> String {
        format!("ATR_{}", self.atr_length())
    }

    fn ema_col(&self) -> String {
        format!("EMA_{}", self.trend_ema())
    }

    fn atr_sma_col(&self) -> String {
        format!("ATR_SMA_{}", self.atr_floor_len())
    }

    /// Session window in UTC minutes-of-day (default 14:35 - 19:45, the NYSE
    /// cash session minus the open/close auctions).
    fn in_session(&self, row: &Row) -> bool {
        let start = param(&self.params, "session_start_hour", 14.0) as u32 * 60
            + param(&self.params, "session_start_minute", 35.0) as u32;
        let end = param(&self.params, "session_end_hour", 19.0) as u32 * 60
            + param(&self.params, "session_end_minute", 45.0) as u32;
        let ts = row.timestamp();
        let cur = ts.hour() * 60 + ts.minute();
        start <= cur && cur <= end
    }
}

impl Strategy for SupertrendMomentum {
    fn name(&self) -> &'static str {
        "SuperTrend Momentum"
    }

    fn setup(&mut self, frame: &mut IndicatorFrame) -> Result<()> {
        let closes = frame.closes();

        let st = supertrend_series(frame.bars(), self.st_length(), self.st_multiplier());
        frame.set_column(self.st_line_col(), st.line);
        frame.set_column(self.st_dir_col(), st.direction);

        frame.set_column(self.adx_col(), adx_series(frame.bars(), self.adx_length()));
        frame.set_column(self.rsi_col(), rsi_series(&closes, self.rsi_length()));

        let atr = atr_series(frame.bars(), self.atr_length());
        frame.set_column(self.atr_sma_col(), sma_series(&atr, self.atr_floor_len()));
        frame.set_column(self.atr_col(), atr);

        frame.set_column(self.ema_col(), ema_series(&closes, self.trend_ema()));
        Ok(())
    }

    fn on_bar(
        &mut self,
        _idx: usize,
        row: &Row,
        position: Option<&Position>,
    ) -> Result<Option<Signal>> {
        let (Some(st_dir), Some(adx), Some(atr)) = (
            row.get(&self.st_dir_col()),
            row.get(&self.adx_col()),
            row.get(&self.atr_col()),
        ) else {
            return Ok(None);
        };

        if !self.in_session(row) {
            if let Some(position) = position {
                return Ok(Some(Signal::close(position.direction(), "End of session")));
            }
            return Ok(None);
        }

        let rsi = row.get(&self.rsi_col());
        let ema_trend = row.get(&self.ema_col());
        let close = row.close();
        let open = row.open();

        if atr <= 0.0 {
            return Ok(None);
        }

        // Track SuperTrend direction duration.
        if self.prev_st_dir == Some(st_dir) {
            self.st_dir_count += 1;
        } else {
            self.st_dir_count = 1;
        }
        let st_flipped_bull = self.prev_st_dir.is_some_and(|prev| prev <= 0.0) && st_dir > 0.0;
        let st_flipped_bear = self.prev_st_dir.is_some_and(|prev| prev >= 0.0) && st_dir < 0.0;
        self.prev_st_dir = Some(st_dir);

        if self.cooldown_remaining > 0 {
            self.cooldown_remaining -= 1;
        }

        // Exit on SuperTrend flip against the position.
        if let Some(position) = position {
            if position.direction() == Direction::Long && st_dir < 0.0 {
                return Ok(Some(Signal::close(
                    Direction::Long,
                    "SuperTrend flipped bearish",
                )));
            }
            if position.direction() == Direction::Short && st_dir > 0.0 {
                return Ok(Some(Signal::close(
                    Direction::Short,
                    "SuperTrend flipped bullish",
                )));
            }
            return Ok(None);
        }

        // ── Entry filters ──

        // Cooldown after a stop-out.
        if self.cooldown_remaining > 0 {
            return Ok(None);
        }

        // ADX trending.
        if adx <= param(&self.params, "adx_min", 25.0) {
            return Ok(None);
        }

        // Anti-whipsaw: SuperTrend must hold for N bars (or be a fresh flip).
        let st_held = self.st_dir_count >= param(&self.params, "st_hold_bars", 2.0) as u32;

        // ATR floor: skip when volatility is below its rolling average.
        if param(&self.params, "use_atr_floor", 1.0) != 0.0 {
            if let Some(atr_sma) = row.get(&self.atr_sma_col()) {
                if atr < atr_sma {
                    return Ok(None);
                }
            }
        }

        // Candle body filter: avoid dojis and spinning tops.
        let range = row.high() - row.low();
        if range > 0.0 {
            let body_pct = (close - open).abs() / range;
            if body_pct < param(&self.params, "candle_body_pct", 0.40) {
                return Ok(None);
            }
        }

        let stop_dist = atr * param(&self.params, "atr_stop_mult", 1.0);
        let target_dist = atr * param(&self.params, "atr_target_mult", 2.5);

        // ── Long entry ──
        let trend_up = ema_trend.is_some_and(|ema| close > ema);
        if st_dir > 0.0 && rsi.is_some_and(|r| r > param(&self.params, "rsi_long_min", 55.0)) {
            let rsi_val = rsi.unwrap();
            // Overbought cap: skip chasing.
            if rsi_val > param(&self.params, "rsi_long_max", 80.0) {
                return Ok(None);
            }
            if (close > open || st_flipped_bull)
                && (trend_up || st_flipped_bull)
                && (st_held || st_flipped_bull)
            {
                let mut signal = Signal::entry(
                    SignalKind::OpenLong,
                    Some(close - stop_dist),
                    Some(close + target_dist),
                    format!("SuperTrend bull, ADX {adx:.0}, RSI {rsi_val:.0}"),
                );
                let trail_mult = param(&self.params, "trailing_stop_atr_mult", 0.0);
                if trail_mult > 0.0 {
                    signal = signal.with_trailing(atr * trail_mult);
                }
                return Ok(Some(signal));
            }
        }

        // ── Short entry ──
        let trend_down = ema_trend.is_some_and(|ema| close < ema);
        if st_dir < 0.0 && rsi.is_some_and(|r| r < param(&self.params, "rsi_short_max", 45.0)) {
            let rsi_val = rsi.unwrap();
            // Oversold cap: skip chasing.
            if rsi_val < param(&self.params, "rsi_short_min", 20.0) {
                return Ok(None);
            }
            if (close < open || st_flipped_bear)
                && (trend_down || st_flipped_bear)
                && (st_held || st_flipped_bear)
            {
                let mut signal = Signal::entry(
                    SignalKind::OpenShort,
                    Some(close + stop_dist),
                    Some(close - target_dist),
                    format!("SuperTrend bear, ADX {adx:.0}, RSI {rsi_val:.0}"),
                );
                let trail_mult = param(&self.params, "trailing_stop_atr_mult", 0.0);
                if trail_mult > 0.0 {
                    signal = signal.with_trailing(atr * trail_mult);
                }
                return Ok(Some(signal));
            }
        }

        Ok(None)
    }

    fn on_trade_closed(&mut self, trade: &Trade) {
        // Activate the re-entry cooldown after a stop-out.
        let stopped = trade
            .exit_reason
            .as_deref()
            .is_some_and(|r| r.to_lowercase().contains("stop"));
        if stopped {
            self.cooldown_remaining = param(&self.params, "cooldown_bars", 3.0) as u32;
        }
    }
}
