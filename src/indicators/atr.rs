// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// ATR measures market volatility by decomposing the entire range of a bar.
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is then the smoothed average of TR using Wilder's method:
//   ATR_0   = SMA of first `period` TR values
//   ATR_t   = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// Default period: 14
// =============================================================================

use crate::types::Bar;

/// Compute the full ATR series for `bars` (oldest first), one output value
/// per input bar.
///
/// The first computable value lands at index `period` (TR needs a previous
/// bar, and the seed consumes `period` TR values); earlier indices hold NaN.
///
/// # Edge cases
/// - `period == 0` or `bars.len() < period + 1` => all-NaN series
/// - A non-finite intermediate poisons the remainder of the series.
pub fn atr_series(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; bars.len()];
    if period == 0 || bars.len() < period + 1 {
        return out;
    }

    // True Range for each consecutive pair; tr[k] belongs to bar k+1.
    let mut tr_values: Vec<f64> = Vec::with_capacity(bars.len() - 1);
    for i in 1..bars.len() {
        let high = bars[i].high;
        let low = bars[i].low;
        let prev_close = bars[i - 1].close;

        let hl = high - low;
        let hc = (high - prev_close).abs();
        let lc = (low - prev_close).abs();

        tr_values.push(hl.max(hc).max(lc));
    }

    // Seed ATR with SMA of the first `period` TR values (lands at bar `period`).
    let seed: f64 = tr_values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return out;
    }
    out[period] = seed;

    let period_f = period as f64;
    let mut atr = seed;
    for (k, &tr) in tr_values.iter().enumerate().skip(period) {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            break;
        }
        out[k + 1] = atr;
    }

    out
}

/// Simple moving average over an already NaN-padded series. A window that
/// contains any NaN produces NaN, so the output head lines up with the input
/// head plus `period - 1`.
pub fn sma_series(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        if window.iter().all(|v| v.is_finite()) {
            out[i] = window.iter().sum::<f64>() / period as f64;
        }
    }

    out
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

    #[test]
    fn atr_period_zero_all_nan() {
        let bars = vec![bar(1.0, 2.0, 0.5, 1.5); 50];
        assert!(atr_series(&bars, 0).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn atr_insufficient_data_all_nan() {
        let bars = vec![bar(1.0, 2.0, 0.5, 1.5); 10];
        assert!(atr_series(&bars, 14).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn atr_constant_range() {
        // Every bar spans exactly 2.0 with no gaps => ATR = 2.0 everywhere.
        let bars = vec![bar(100.0, 101.0, 99.0, 100.0); 30];
        let out = atr_series(&bars, 14);
        for &v in &out[..14] {
            assert!(v.is_nan());
        }
        for &v in &out[14..] {
            assert!((v - 2.0).abs() < 1e-10, "expected ATR 2.0, got {v}");
        }
    }

    #[test]
    fn atr_is_positive() {
        let bars: Vec<Bar> = (0..60)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.4).sin() * 5.0;
                bar(base, base + 1.5, base - 1.0, base + 0.3)
            })
            .collect();
        for v in atr_series(&bars, 14).iter().filter(|v| v.is_finite()) {
            assert!(*v > 0.0);
        }
    }

    #[test]
    fn sma_over_nan_padded_series() {
        let values = vec![f64::NAN, f64::NAN, 2.0, 4.0, 6.0, 8.0];
        let out = sma_series(&values, 2);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert!(out[2].is_nan()); // window still contains a NaN
        assert!((out[3] - 3.0).abs() < 1e-12);
        assert!((out[4] - 5.0).abs() < 1e-12);
        assert!((out[5] - 7.0).abs() < 1e-12);
    }

    #[test]
    fn sma_period_longer_than_input() {
        let out = sma_series(&[1.0, 2.0], 5);
        assert!(out.iter().all(|v| v.is_nan()));
    }
}
