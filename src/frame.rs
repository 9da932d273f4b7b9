// =============================================================================
// Indicator Frame — rolling bar window with named indicator columns
// =============================================================================
//
// An append-only ring of bars (bounded at `cap`) plus a sidecar map of named
// f64 columns. Every column always has exactly one value per bar; positions
// an indicator cannot compute yet hold NaN. Eviction removes the oldest bar
// and the oldest entry of every column in the same call, so bars and columns
// can never drift out of alignment.
//
// Indicator columns are a pure function of the retained bar window plus
// static parameters — `Strategy::setup` recomputes them from scratch on every
// bar, which keeps live values bit-identical to a full recomputation.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::types::Bar;

/// Default bar retention per (symbol, timeframe) slot.
pub const MAX_BARS: usize = 500;

// ---------------------------------------------------------------------------
// Row snapshot
// ---------------------------------------------------------------------------

/// Owned snapshot of one frame row: the bar plus every indicator value at
/// that index. Handed to strategies and buffered alongside signals, so it
/// must not borrow from the frame.
#[derive(Debug, Clone)]
pub struct Row {
    pub index: usize,
    pub bar: Bar,
    values: HashMap<String, f64>,
}

impl Row {
    /// Indicator value by column name. `None` when the column is absent or
    /// the value is NaN (not yet computable at this index).
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied().filter(|v| v.is_finite())
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.bar.timestamp
    }

    pub fn open(&self) -> f64 {
        self.bar.open
    }

    pub fn high(&self) -> f64 {
        self.bar.high
    }

    pub fn low(&self) -> f64 {
        self.bar.low
    }

    pub fn close(&self) -> f64 {
        self.bar.close
    }

    pub fn volume(&self) -> f64 {
        self.bar.volume
    }
}

// ---------------------------------------------------------------------------
// IndicatorFrame
// ---------------------------------------------------------------------------

/// Rolling window of bars plus derived indicator columns.
#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    bars: Vec<Bar>,
    columns: BTreeMap<String, Vec<f64>>,
    cap: usize,
}

impl IndicatorFrame {
    /// Create an empty frame retaining at most `cap` bars.
    pub fn new(cap: usize) -> Self {
        Self {
            bars: Vec::with_capacity(cap.min(MAX_BARS) + 1),
            columns: BTreeMap::new(),
            cap: cap.max(1),
        }
    }

    /// Build a frame from historical bars (oldest first), trimming to `cap`.
    pub fn from_bars(bars: Vec<Bar>, cap: usize) -> Self {
        let mut frame = Self::new(cap);
        for bar in bars {
            frame.push_bar(bar);
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn last_bar(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Append a bar, padding every column with NaN at the new index. If the
    /// frame exceeds its cap the oldest bar and the head of every column are
    /// evicted together.
    pub fn push_bar(&mut self, bar: Bar) {
        self.bars.push(bar);
        for col in self.columns.values_mut() {
            col.push(f64::NAN);
        }
        if self.bars.len() > self.cap {
            self.bars.remove(0);
            for col in self.columns.values_mut() {
                col.remove(0);
            }
        }
    }

    /// Install (or replace) a full indicator column. The series must be
    /// exactly one value per bar; indicator functions NaN-pad their heads to
    /// guarantee this.
    pub fn set_column(&mut self, name: impl Into<String>, values: Vec<f64>) {
        debug_assert_eq!(
            values.len(),
            self.bars.len(),
            "indicator column length must match bar count"
        );
        let mut values = values;
        values.resize(self.bars.len(), f64::NAN);
        self.columns.insert(name.into(), values);
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    /// Indicator value at `idx`; `None` for missing column or NaN.
    pub fn value(&self, name: &str, idx: usize) -> Option<f64> {
        self.columns
            .get(name)
            .and_then(|col| col.get(idx))
            .copied()
            .filter(|v| v.is_finite())
    }

    /// Close prices over the retained window (oldest first).
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// Owned snapshot of the row at `idx`.
    pub fn row(&self, idx: usize) -> Option<Row> {
        let bar = *self.bars.get(idx)?;
        let values = self
            .columns
            .iter()
            .filter_map(|(name, col)| col.get(idx).map(|v| (name.clone(), *v)))
            .collect();
        Some(Row {
            index: idx,
            bar,
            values,
        })
    }

    /// Snapshot of the most recent row.
    pub fn last_row(&self) -> Option<Row> {
        if self.bars.is_empty() {
            None
        } else {
            self.row(self.bars.len() - 1)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(minute: u32, close: f64) -> Bar {
        let ts = Utc
            .with_ymd_and_hms(2026, 3, 2, 15, minute, 0)
            .unwrap();
        Bar::new(ts, close, close + 1.0, close - 1.0, close, 100.0)
    }

    #[test]
    fn push_trims_to_cap() {
        let mut frame = IndicatorFrame::new(3);
        for i in 0..5 {
            frame.push_bar(bar(i, 100.0 + i as f64));
        }
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.closes(), vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn eviction_keeps_columns_aligned() {
        let mut frame = IndicatorFrame::new(3);
        frame.push_bar(bar(0, 100.0));
        frame.push_bar(bar(1, 101.0));
        frame.push_bar(bar(2, 102.0));
        frame.set_column("EMA_2", vec![f64::NAN, 100.5, 101.5]);

        // Overflow — oldest bar and oldest column entry go together.
        frame.push_bar(bar(3, 103.0));
        assert_eq!(frame.len(), 3);
        let col = frame.column("EMA_2").unwrap();
        assert_eq!(col.len(), 3);
        assert_eq!(col[0], 100.5);
        assert_eq!(col[1], 101.5);
        assert!(col[2].is_nan()); // padded at append, not yet recomputed
    }

    #[test]
    fn value_filters_nan() {
        let mut frame = IndicatorFrame::new(10);
        frame.push_bar(bar(0, 100.0));
        frame.push_bar(bar(1, 101.0));
        frame.set_column("RSI_9", vec![f64::NAN, 55.0]);

        assert_eq!(frame.value("RSI_9", 0), None);
        assert_eq!(frame.value("RSI_9", 1), Some(55.0));
        assert_eq!(frame.value("missing", 1), None);
    }

    #[test]
    fn row_snapshot_carries_indicators() {
        let mut frame = IndicatorFrame::new(10);
        frame.push_bar(bar(0, 100.0));
        frame.push_bar(bar(1, 101.0));
        frame.set_column("ADX_14", vec![f64::NAN, 30.0]);

        let row = frame.last_row().unwrap();
        assert_eq!(row.index, 1);
        assert_eq!(row.close(), 101.0);
        assert_eq!(row.get("ADX_14"), Some(30.0));
        assert_eq!(row.get("RSI_9"), None);

        let first = frame.row(0).unwrap();
        assert_eq!(first.get("ADX_14"), None); // NaN filtered
    }

    #[test]
    fn from_bars_respects_cap() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(i, 100.0 + i as f64)).collect();
        let frame = IndicatorFrame::from_bars(bars, 4);
        assert_eq!(frame.len(), 4);
        assert_eq!(frame.closes(), vec![106.0, 107.0, 108.0, 109.0]);
    }
}
