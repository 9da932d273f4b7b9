// =============================================================================
// Bar Aggregator — folds 1-minute bars into N-minute bars
// =============================================================================
//
// The feed streams 1-minute bars natively; this module aggregates them into
// 2m, 5m, 10m, ... bars whose windows are aligned to clock boundaries
// (:00, :05, :10, ...), not to the first bar seen.
//
// Window rules:
//   - window start  W = floor(ts_minute / N) * N
//   - the bar at minute W + N - 1 is the terminal minute and completes the
//     window immediately
//   - a bar opening a different window first flushes any buffered bars from
//     the previous window
//   - a missing minute does not rebase the window; the next bar whose window
//     start equals W keeps filling it
//   - a bar arriving late for an already-completed window is dropped
//
// Aggregation of k bars: open = first.open, high = max, low = min,
// close = last.close, volume = sum. N = 1 passes bars through unchanged.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, DurationRound, TimeDelta, Timelike, Utc};
use tracing::debug;

use crate::types::Bar;

struct WindowBuffer {
    window_start: DateTime<Utc>,
    bars: Vec<Bar>,
}

/// Aggregates 1-minute bars into N-minute bars, with separate buffers per
/// symbol.
pub struct BarAggregator {
    tf_minutes: u32,
    buffers: HashMap<String, WindowBuffer>,
}

impl BarAggregator {
    /// `tf_minutes` is the target timeframe; 1 passes bars through.
    pub fn new(tf_minutes: u32) -> Self {
        Self {
            tf_minutes: tf_minutes.max(1),
            buffers: HashMap::new(),
        }
    }

    pub fn timeframe_minutes(&self) -> u32 {
        self.tf_minutes
    }

    /// Process an incoming 1-minute bar, returning any completed aggregated
    /// bars (a stale-window flush and a terminal-minute emission can both
    /// occur on one call).
    pub fn on_minute_bar(&mut self, symbol: &str, bar: Bar) -> Vec<Bar> {
        if self.tf_minutes == 1 {
            return vec![bar];
        }

        let mut emitted = Vec::new();
        let window_start = floor_to_window(bar.timestamp, self.tf_minutes);
        let window_end = window_start + TimeDelta::minutes(self.tf_minutes as i64);

        let buf = self
            .buffers
            .entry(symbol.to_string())
            .or_insert_with(|| WindowBuffer {
                window_start,
                bars: Vec::new(),
            });

        // Late bar for a window that has already moved on: drop, never
        // re-emit a completed window.
        if window_start < buf.window_start {
            debug!(
                symbol,
                bar_ts = %bar.timestamp,
                window = %window_start,
                current_window = %buf.window_start,
                "dropping late bar for completed window"
            );
            return emitted;
        }

        // New window opened: flush whatever the previous window collected.
        if window_start > buf.window_start {
            if !buf.bars.is_empty() {
                emitted.push(aggregate(&buf.bars, buf.window_start));
            }
            buf.window_start = window_start;
            buf.bars.clear();
        }

        buf.bars.push(bar);

        // Terminal minute of the window completes it immediately.
        if bar.timestamp.minute() % self.tf_minutes == self.tf_minutes - 1 {
            emitted.push(aggregate(&buf.bars, buf.window_start));
            buf.bars.clear();
            buf.window_start = window_end;
        }

        emitted
    }

    /// Emit any partially accumulated window for `symbol` (or all symbols),
    /// e.g. at market close or shutdown.
    pub fn flush(&mut self, symbol: Option<&str>) -> Vec<(String, Bar)> {
        let mut emitted = Vec::new();
        let symbols: Vec<String> = match symbol {
            Some(s) => vec![s.to_string()],
            None => self.buffers.keys().cloned().collect(),
        };

        for s in symbols {
            if let Some(buf) = self.buffers.get_mut(&s) {
                if !buf.bars.is_empty() {
                    emitted.push((s.clone(), aggregate(&buf.bars, buf.window_start)));
                    buf.bars.clear();
                }
            }
        }
        emitted
    }
}

/// Clock-aligned window start: floor the minute-of-hour to a multiple of N.
fn floor_to_window(ts: DateTime<Utc>, tf_minutes: u32) -> DateTime<Utc> {
    let minute_floor = ts
        .duration_trunc(TimeDelta::minutes(1))
        .expect("minute truncation cannot fail");
    let excess = (minute_floor.minute() % tf_minutes) as i64;
    minute_floor - TimeDelta::minutes(excess)
}

fn aggregate(bars: &[Bar], window_start: DateTime<Utc>) -> Bar {
    Bar {
        timestamp: window_start,
        open: bars[0].open,
        high: bars.iter().map(|b| b.high).fold(f64::MIN, f64::max),
        low: bars.iter().map(|b| b.low).fold(f64::MAX, f64::min),
        close: bars[bars.len() - 1].close,
        volume: bars.iter().map(|b| b.volume).sum(),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn bar(h: u32, m: u32, o: f64, hi: f64, lo: f64, c: f64, v: f64) -> Bar {
        Bar::new(at(h, m), o, hi, lo, c, v)
    }

    #[test]
    fn five_minute_window_completes_on_terminal_minute() {
        // Three bars filling out a 5m window; the :34 bar is terminal and
        // emits one aggregated bar stamped at the window start.
        let mut agg = BarAggregator::new(5);
        assert!(agg
            .on_minute_bar("MSTR", bar(14, 32, 10.0, 11.0, 9.0, 10.0, 100.0))
            .is_empty());
        assert!(agg
            .on_minute_bar("MSTR", bar(14, 33, 10.0, 12.0, 10.0, 11.0, 200.0))
            .is_empty());
        let out = agg.on_minute_bar("MSTR", bar(14, 34, 11.0, 11.5, 10.5, 11.0, 300.0));
        assert_eq!(out.len(), 1);

        let b = out[0];
        assert_eq!(b.timestamp, at(14, 30));
        assert_eq!(b.open, 10.0);
        assert_eq!(b.high, 12.0);
        assert_eq!(b.low, 9.0);
        assert_eq!(b.close, 11.0);
        assert_eq!(b.volume, 600.0);

        // The next bar opens the following window — no emission yet.
        assert!(agg
            .on_minute_bar("MSTR", bar(14, 35, 11.0, 11.2, 10.9, 11.1, 50.0))
            .is_empty());
    }

    #[test]
    fn aggregated_timestamp_is_floor_of_contained_bars() {
        let mut agg = BarAggregator::new(10);
        agg.on_minute_bar("MSTR", bar(14, 33, 1.0, 1.0, 1.0, 1.0, 1.0));
        let out = agg.on_minute_bar("MSTR", bar(14, 39, 2.0, 2.0, 2.0, 2.0, 1.0));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, at(14, 30));
    }

    #[test]
    fn new_window_flushes_partial_previous_window() {
        let mut agg = BarAggregator::new(5);
        agg.on_minute_bar("MSTR", bar(14, 31, 10.0, 10.5, 9.5, 10.2, 100.0));
        // Jump past the terminal minute of the first window.
        let out = agg.on_minute_bar("MSTR", bar(14, 36, 11.0, 11.5, 10.8, 11.2, 200.0));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, at(14, 30));
        assert_eq!(out[0].close, 10.2);
        assert_eq!(out[0].volume, 100.0);
    }

    #[test]
    fn missing_minute_does_not_rebase_window() {
        let mut agg = BarAggregator::new(5);
        agg.on_minute_bar("MSTR", bar(14, 30, 10.0, 10.5, 9.5, 10.2, 100.0));
        // :31 .. :33 missing; :34 still belongs to the 14:30 window and is
        // its terminal minute.
        let out = agg.on_minute_bar("MSTR", bar(14, 34, 10.4, 10.8, 10.3, 10.6, 150.0));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, at(14, 30));
        assert_eq!(out[0].open, 10.0);
        assert_eq!(out[0].close, 10.6);
        assert_eq!(out[0].volume, 250.0);
    }

    #[test]
    fn late_bar_for_completed_window_is_dropped() {
        let mut agg = BarAggregator::new(5);
        agg.on_minute_bar("MSTR", bar(14, 33, 10.0, 10.5, 9.5, 10.2, 100.0));
        let out = agg.on_minute_bar("MSTR", bar(14, 34, 10.2, 10.6, 10.1, 10.4, 100.0));
        assert_eq!(out.len(), 1);

        // A straggler from the emitted window must not re-emit anything.
        let out = agg.on_minute_bar("MSTR", bar(14, 32, 10.1, 10.3, 10.0, 10.2, 100.0));
        assert!(out.is_empty());

        // And the next window is unaffected.
        agg.on_minute_bar("MSTR", bar(14, 37, 10.5, 10.7, 10.4, 10.6, 100.0));
        let out = agg.on_minute_bar("MSTR", bar(14, 39, 10.6, 10.8, 10.5, 10.7, 100.0));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, at(14, 35));
        assert_eq!(out[0].volume, 200.0);
    }

    #[test]
    fn one_minute_timeframe_passes_through() {
        let mut agg = BarAggregator::new(1);
        let b = bar(14, 33, 10.0, 10.5, 9.5, 10.2, 100.0);
        let out = agg.on_minute_bar("MSTR", b);
        assert_eq!(out, vec![b]);
    }

    #[test]
    fn symbols_have_independent_buffers() {
        let mut agg = BarAggregator::new(5);
        agg.on_minute_bar("MSTR", bar(14, 30, 10.0, 10.5, 9.5, 10.2, 100.0));
        agg.on_minute_bar("PLTR", bar(14, 31, 20.0, 20.5, 19.5, 20.2, 500.0));

        let out = agg.on_minute_bar("MSTR", bar(14, 34, 10.2, 10.6, 10.1, 10.4, 100.0));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].volume, 200.0); // PLTR's bar not mixed in

        let flushed = agg.flush(Some("PLTR"));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, "PLTR");
        assert_eq!(flushed[0].1.volume, 500.0);
    }

    #[test]
    fn flush_all_emits_every_partial_buffer() {
        let mut agg = BarAggregator::new(5);
        agg.on_minute_bar("MSTR", bar(14, 30, 10.0, 10.5, 9.5, 10.2, 100.0));
        agg.on_minute_bar("PLTR", bar(14, 31, 20.0, 20.5, 19.5, 20.2, 500.0));

        let mut flushed = agg.flush(None);
        flushed.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].0, "MSTR");
        assert_eq!(flushed[1].0, "PLTR");

        // Buffers are now empty.
        assert!(agg.flush(None).is_empty());
    }

    #[test]
    fn constant_price_round_trip() {
        // N consecutive 1m bars with high=low=open=close=c_i must fold into
        // open=c_0, close=c_{N-1}, high=max, low=min, volume=sum.
        let mut agg = BarAggregator::new(5);
        let closes = [10.0, 12.0, 9.0, 11.0, 10.5];
        let mut out = Vec::new();
        for (i, &c) in closes.iter().enumerate() {
            out.extend(agg.on_minute_bar("MSTR", bar(14, 30 + i as u32, c, c, c, c, 1.0)));
        }
        assert_eq!(out.len(), 1);
        let b = out[0];
        assert_eq!(b.open, 10.0);
        assert_eq!(b.close, 10.5);
        assert_eq!(b.high, 12.0);
        assert_eq!(b.low, 9.0);
        assert_eq!(b.volume, 5.0);
    }
}
