// =============================================================================
// SuperTrend — ATR-banded trend follower
// =============================================================================
//
// SuperTrend draws a stop-and-reverse line a multiple of ATR away from the
// bar midpoint and flips direction when price closes through it.
//
//   hl2          = (high + low) / 2
//   basic_upper  = hl2 + multiplier * ATR
//   basic_lower  = hl2 - multiplier * ATR
//
// Final bands carry over: the upper band may only move down (unless price
// closed above it), the lower band may only move up (unless price closed
// below it). Direction is +1 while price holds above the lower band, -1
// while it holds below the upper band.
// =============================================================================

use crate::indicators::atr::atr_series;
use crate::types::Bar;

/// SuperTrend output: the line itself plus a direction series (+1 bullish,
/// -1 bearish). Both are full-length with NaN heads.
#[derive(Debug, Clone)]
pub struct SuperTrend {
    pub line: Vec<f64>,
    pub direction: Vec<f64>,
}

/// Compute the SuperTrend line and direction for `bars` (oldest first).
///
/// The first computable value lands where the ATR does (index `period`);
/// earlier indices hold NaN in both series.
pub fn supertrend_series(bars: &[Bar], period: usize, multiplier: f64) -> SuperTrend {
    let n = bars.len();
    let mut line = vec![f64::NAN; n];
    let mut direction = vec![f64::NAN; n];

    if period == 0 || n < period + 1 || !multiplier.is_finite() || multiplier <= 0.0 {
        return SuperTrend { line, direction };
    }

    let atr = atr_series(bars, period);

    // First index with a finite ATR.
    let start = period;
    if !atr[start].is_finite() {
        return SuperTrend { line, direction };
    }

    let hl2 = |i: usize| (bars[i].high + bars[i].low) / 2.0;

    let mut final_upper = hl2(start) + multiplier * atr[start];
    let mut final_lower = hl2(start) - multiplier * atr[start];
    let mut dir: f64 = if bars[start].close >= hl2(start) {
        1.0
    } else {
        -1.0
    };

    line[start] = if dir > 0.0 { final_lower } else { final_upper };
    direction[start] = dir;

    for i in (start + 1)..n {
        if !atr[i].is_finite() {
            break;
        }

        let basic_upper = hl2(i) + multiplier * atr[i];
        let basic_lower = hl2(i) - multiplier * atr[i];
        let prev_close = bars[i - 1].close;

        // Band carryover.
        final_upper = if basic_upper < final_upper || prev_close > final_upper {
            basic_upper
        } else {
            final_upper
        };
        final_lower = if basic_lower > final_lower || prev_close < final_lower {
            basic_lower
        } else {
            final_lower
        };

        // Direction flip on close through the active band.
        let close = bars[i].close;
        dir = if dir > 0.0 {
            if close < final_lower {
                -1.0
            } else {
                1.0
            }
        } else if close > final_upper {
            1.0
        } else {
            -1.0
        };

        line[i] = if dir > 0.0 { final_lower } else { final_upper };
        direction[i] = dir;
    }

    SuperTrend { line, direction }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        Bar::new(ts, open, high, low, close, 1.0)
    }

    fn uptrend(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                bar(base, base + 1.0, base - 1.0, base + 0.8)
            })
            .collect()
    }

    fn downtrend(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let base = 200.0 - i as f64 * 2.0;
                bar(base, base + 1.0, base - 1.0, base - 0.8)
            })
            .collect()
    }

    #[test]
    fn supertrend_insufficient_data_all_nan() {
        let st = supertrend_series(&uptrend(5), 7, 2.5);
        assert!(st.line.iter().all(|v| v.is_nan()));
        assert!(st.direction.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn supertrend_bad_multiplier_all_nan() {
        let st = supertrend_series(&uptrend(50), 7, 0.0);
        assert!(st.direction.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn supertrend_uptrend_is_bullish_below_price() {
        let bars = uptrend(60);
        let st = supertrend_series(&bars, 7, 2.5);
        // Once established, direction is +1 and the line stays below close.
        for i in 20..60 {
            assert_eq!(st.direction[i], 1.0, "bar {i} should be bullish");
            assert!(st.line[i] < bars[i].close);
        }
    }

    #[test]
    fn supertrend_downtrend_is_bearish_above_price() {
        let bars = downtrend(60);
        let st = supertrend_series(&bars, 7, 2.5);
        for i in 20..60 {
            assert_eq!(st.direction[i], -1.0, "bar {i} should be bearish");
            assert!(st.line[i] > bars[i].close);
        }
    }

    #[test]
    fn supertrend_flips_on_reversal() {
        // Strong rally, then a crash well through any plausible band.
        let mut bars = uptrend(40);
        let last = bars.last().unwrap().close;
        for i in 0..20 {
            let base = last - (i as f64 + 1.0) * 8.0;
            bars.push(bar(base + 1.0, base + 2.0, base - 2.0, base - 1.0));
        }
        let st = supertrend_series(&bars, 7, 2.5);
        assert_eq!(st.direction[39], 1.0);
        let tail = *st.direction.last().unwrap();
        assert_eq!(tail, -1.0, "crash should flip SuperTrend bearish");
    }

    #[test]
    fn supertrend_lower_band_monotone_in_uptrend() {
        let bars = uptrend(60);
        let st = supertrend_series(&bars, 7, 2.5);
        // While bullish, the stop line may only ratchet upward.
        for i in 21..60 {
            if st.direction[i] == 1.0 && st.direction[i - 1] == 1.0 {
                assert!(st.line[i] >= st.line[i - 1] - 1e-9);
            }
        }
    }
}
