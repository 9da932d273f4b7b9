// =============================================================================
// Average Directional Index (ADX)
// =============================================================================
//
// ADX quantifies trend **strength** regardless of direction.
//
// Calculation pipeline:
//   1. Compute +DM (positive directional movement) and -DM per bar.
//   2. Compute True Range (TR) per bar.
//   3. Apply Wilder's smoothing (period) to +DM, -DM, and TR.
//   4. Derive +DI = smoothed(+DM) / smoothed(TR) * 100
//            -DI = smoothed(-DM) / smoothed(TR) * 100
//   5. DX  = |+DI - -DI| / (+DI + -DI) * 100
//   6. ADX = Wilder's smoothed average of DX over `period` bars.
//
// Interpretation:
//   ADX > 25  => trending market
//   ADX < 20  => ranging / choppy market
// =============================================================================

use crate::types::Bar;

/// Compute the full ADX series for `bars` (oldest first), one output value
/// per input bar.
///
/// The first computable value lands at index `2 * period - 1`: `period` bars
/// seed the Wilder smoothing of +DM/-DM/TR, and another `period` DX values
/// seed the ADX average. Earlier indices hold NaN.
///
/// # Edge cases
/// - `period == 0` or fewer than `2 * period + 1` bars => all-NaN series
/// - A zero smoothed TR (no range at all) ends the series early.
pub fn adx_series(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; bars.len()];
    if period == 0 || bars.len() < 2 * period + 1 {
        return out;
    }

    let period_f = period as f64;
    let n = bars.len();
    let transitions = n - 1;

    // ------------------------------------------------------------------
    // Step 1 & 2: raw +DM, -DM, and True Range per bar-to-bar transition.
    // Transition k moves bar k -> k+1.
    // ------------------------------------------------------------------
    let mut plus_dm = Vec::with_capacity(transitions);
    let mut minus_dm = Vec::with_capacity(transitions);
    let mut tr_vals = Vec::with_capacity(transitions);

    for i in 1..n {
        let high = bars[i].high;
        let low = bars[i].low;
        let prev_high = bars[i - 1].high;
        let prev_low = bars[i - 1].low;
        let prev_close = bars[i - 1].close;

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());

        let up_move = high - prev_high;
        let down_move = prev_low - low;

        let pdm = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        let mdm = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };

        plus_dm.push(pdm);
        minus_dm.push(mdm);
        tr_vals.push(tr);
    }

    // ------------------------------------------------------------------
    // Step 3: Wilder's smoothing, then a DX value per remaining transition.
    // dx_values[k] corresponds to bar index period + k.
    // ------------------------------------------------------------------
    let mut smooth_plus_dm: f64 = plus_dm[..period].iter().sum();
    let mut smooth_minus_dm: f64 = minus_dm[..period].iter().sum();
    let mut smooth_tr: f64 = tr_vals[..period].iter().sum();

    let mut dx_values: Vec<f64> = Vec::with_capacity(transitions - period + 1);

    match compute_dx(smooth_plus_dm, smooth_minus_dm, smooth_tr) {
        Some(dx) => dx_values.push(dx),
        None => return out,
    }

    for i in period..transitions {
        smooth_plus_dm = smooth_plus_dm - smooth_plus_dm / period_f + plus_dm[i];
        smooth_minus_dm = smooth_minus_dm - smooth_minus_dm / period_f + minus_dm[i];
        smooth_tr = smooth_tr - smooth_tr / period_f + tr_vals[i];

        match compute_dx(smooth_plus_dm, smooth_minus_dm, smooth_tr) {
            Some(dx) => dx_values.push(dx),
            None => return out,
        }
    }

    // ------------------------------------------------------------------
    // Step 6: ADX = Wilder's smoothed average of DX. The seed (SMA of the
    // first `period` DX values) lands at bar index 2*period - 1.
    // ------------------------------------------------------------------
    if dx_values.len() < period {
        return out;
    }

    let seed: f64 = dx_values[..period].iter().sum::<f64>() / period_f;
    if !seed.is_finite() {
        return out;
    }

    let mut adx = seed;
    out[2 * period - 1] = adx;

    for (k, &dx) in dx_values.iter().enumerate().skip(period) {
        adx = (adx * (period_f - 1.0) + dx) / period_f;
        if !adx.is_finite() {
            break;
        }
        out[period + k] = adx;
    }

    out
}

// =============================================================================
// Internal helpers
// =============================================================================

/// Compute DX from smoothed +DM, -DM, and TR values.
///
/// Returns `None` if the smoothed TR is zero (degenerate, no range at all).
fn compute_dx(smooth_plus_dm: f64, smooth_minus_dm: f64, smooth_tr: f64) -> Option<f64> {
    if smooth_tr == 0.0 {
        return None;
    }

    let plus_di = (smooth_plus_dm / smooth_tr) * 100.0;
    let minus_di = (smooth_minus_dm / smooth_tr) * 100.0;

    let di_sum = plus_di + minus_di;
    if di_sum == 0.0 {
        // Both +DI and -DI are zero — no directional movement.
        return Some(0.0);
    }

    let dx = ((plus_di - minus_di).abs() / di_sum) * 100.0;

    if dx.is_finite() {
        Some(dx)
    } else {
        None
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    /// Volume and timestamps are irrelevant for the ADX calculation.
    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        Bar::new(ts, open, high, low, close, 1.0)
    }

    #[test]
    fn adx_period_zero_all_nan() {
        let bars = vec![bar(1.0, 2.0, 0.5, 1.5); 50];
        assert!(adx_series(&bars, 0).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn adx_insufficient_data_all_nan() {
        let bars = vec![bar(1.0, 2.0, 0.5, 1.5); 10];
        assert!(adx_series(&bars, 14).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn adx_first_value_position() {
        let period = 5;
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64;
                bar(base, base + 1.0, base - 0.5, base + 0.5)
            })
            .collect();
        let out = adx_series(&bars, period);
        for &v in &out[..2 * period - 1] {
            assert!(v.is_nan());
        }
        assert!(out[2 * period - 1].is_finite());
        assert!(out[2 * period].is_finite());
    }

    #[test]
    fn adx_strong_uptrend() {
        // Consecutive higher highs and higher lows — a strong trend.
        let bars: Vec<Bar> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                bar(base, base + 1.5, base - 0.5, base + 1.0)
            })
            .collect();

        let out = adx_series(&bars, 14);
        let last = *out.last().unwrap();
        assert!(last.is_finite());
        assert!(last > 25.0, "expected ADX > 25 for strong trend, got {last}");
    }

    #[test]
    fn adx_flat_market() {
        // Identical bars — no directional movement, DX = 0 for every bar.
        let bars = vec![bar(100.0, 101.0, 99.0, 100.0); 60];
        let out = adx_series(&bars, 14);
        let last = *out.last().unwrap();
        assert!(last.is_finite());
        assert!(last < 1.0, "expected ADX near 0 for flat market, got {last}");
    }

    #[test]
    fn adx_result_range() {
        let bars: Vec<Bar> = (0..100)
            .map(|i| {
                let base = 50.0 + (i as f64 * 0.3).sin() * 10.0;
                bar(base - 0.5, base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();
        for v in adx_series(&bars, 14).iter().filter(|v| v.is_finite()) {
            assert!((0.0..=100.0).contains(v), "ADX {v} out of [0,100] range");
        }
    }
}
