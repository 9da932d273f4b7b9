// =============================================================================
// Warmup — historical bootstrap and strategy state priming
// =============================================================================
//
// On startup each strategy instance must reach the state it would have if the
// bot had been running since the start of the fetched history:
//
//   1. Fetch enough historical bars to satisfy every indicator lookback.
//   2. Run `setup` to compute indicator columns over the history.
//   3. Replay `on_bar` through every historical row, discarding the returned
//      signals, so internal state (previous values, streak counters, trailing
//      references) lands exactly where a continuous run would have put it.
//
// Per-bar failures during the replay (typically NaN rows near the head) are
// swallowed. Live bars then append to the same frame.
// =============================================================================

use anyhow::Result;
use tracing::{info, warn};

use crate::broker::Broker;
use crate::frame::{IndicatorFrame, MAX_BARS};
use crate::strategy::Strategy;
use crate::types::format_timeframe;

/// Default history depth. Sized to exceed the longest indicator lookback in
/// the registry (trend EMA 50) with a wide margin for state to stabilise.
pub const DEFAULT_WARMUP_BARS: usize = 200;

/// Fetch history from the broker and prime `strategy` over it. Returns the
/// frame live bars should keep appending to; empty when the broker had no
/// data for the symbol/timeframe.
pub async fn warmup_strategy(
    strategy: &mut dyn Strategy,
    broker: &dyn Broker,
    symbol: &str,
    timeframe_minutes: u32,
    warmup_bars: usize,
) -> Result<IndicatorFrame> {
    let tf_label = format_timeframe(timeframe_minutes);
    info!(
        strategy = strategy.name(),
        symbol,
        timeframe = %tf_label,
        warmup_bars,
        "warming up strategy"
    );

    let bars = broker.get_bars(symbol, timeframe_minutes, warmup_bars).await?;
    if bars.is_empty() {
        warn!(symbol, timeframe = %tf_label, "no historical bars returned");
        return Ok(IndicatorFrame::new(MAX_BARS));
    }

    info!(
        count = bars.len(),
        first = %bars[0].timestamp,
        last = %bars[bars.len() - 1].timestamp,
        "historical bars fetched"
    );

    let mut frame = IndicatorFrame::from_bars(bars, MAX_BARS);
    let primed = prime_strategy(strategy, &mut frame)?;

    info!(
        primed,
        total = frame.len(),
        columns = ?frame.column_names(),
        "strategy state primed, ready for live bars"
    );

    Ok(frame)
}

/// Compute indicators and replay `on_bar` over every row of `frame`,
/// discarding signals. Returns how many rows replayed cleanly.
pub fn prime_strategy(strategy: &mut dyn Strategy, frame: &mut IndicatorFrame) -> Result<usize> {
    strategy.setup(frame)?;

    let mut primed = 0;
    for idx in 0..frame.len() {
        let Some(row) = frame.row(idx) else { continue };
        // Signals are discarded; per-bar errors (NaN head rows) are swallowed.
        match strategy.on_bar(idx, &row, None) {
            Ok(_) => primed += 1,
            Err(_) => {}
        }
    }

    Ok(primed)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Row;
    use crate::position::Position;
    use crate::strategies::EmaCross;
    use crate::strategy::{Params, Strategy};
    use crate::types::{Bar, Signal, SignalKind};
    use chrono::{TimeZone, Utc};

    fn bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let ts = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()
                    + chrono::Duration::minutes(5 * i as i64);
                Bar::new(ts, c, c + 0.5, c - 0.5, c, 1_000.0)
            })
            .collect()
    }

    #[test]
    fn prime_replays_every_row() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let mut frame = IndicatorFrame::from_bars(bars(&closes), MAX_BARS);
        let mut strategy = EmaCross::new(Params::new());

        let primed = prime_strategy(&mut strategy, &mut frame).unwrap();
        assert_eq!(primed, 60);
        assert!(frame.has_column("EMA_9"));
        assert!(frame.has_column("EMA_21"));
    }

    #[test]
    fn primed_state_matches_continuous_run() {
        // A strategy primed over history must behave on the next bar exactly
        // like an instance that processed the same bars one at a time.
        let mut closes: Vec<f64> = (0..40).map(|i| 120.0 - i as f64).collect();
        closes.extend((0..25).map(|i| 80.0 + 3.0 * i as f64));
        let history = bars(&closes);

        // Continuous run: incremental appends.
        let mut continuous = EmaCross::new(Params::new());
        let mut cont_frame = IndicatorFrame::new(MAX_BARS);
        let mut cont_signals: Vec<Signal> = Vec::new();
        for bar in &history {
            cont_frame.push_bar(*bar);
            continuous.setup(&mut cont_frame).unwrap();
            let row = cont_frame.last_row().unwrap();
            if let Some(s) = continuous.on_bar(row.index, &row, None).unwrap() {
                cont_signals.push(s);
            }
        }

        // Warmed run: bulk prime, then one extra live bar for each.
        let mut warmed = EmaCross::new(Params::new());
        let mut warm_frame = IndicatorFrame::from_bars(history.clone(), MAX_BARS);
        prime_strategy(&mut warmed, &mut warm_frame).unwrap();

        let next = bars(&[200.0])[0];
        let step = |strategy: &mut EmaCross, frame: &mut IndicatorFrame| -> Option<Signal> {
            frame.push_bar(next);
            strategy.setup(frame).unwrap();
            let row = frame.last_row().unwrap();
            strategy.on_bar(row.index, &row, None).unwrap()
        };

        let cont_next = step(&mut continuous, &mut cont_frame);
        let warm_next = step(&mut warmed, &mut warm_frame);
        assert_eq!(cont_next, warm_next);
    }

    #[test]
    fn prime_swallows_per_bar_errors() {
        struct Brittle {
            calls: usize,
        }
        impl Strategy for Brittle {
            fn name(&self) -> &'static str {
                "Brittle"
            }
            fn setup(&mut self, _frame: &mut IndicatorFrame) -> anyhow::Result<()> {
                Ok(())
            }
            fn on_bar(
                &mut self,
                idx: usize,
                _row: &Row,
                _position: Option<&Position>,
            ) -> anyhow::Result<Option<Signal>> {
                self.calls += 1;
                if idx < 3 {
                    anyhow::bail!("indicators not ready");
                }
                Ok(Some(Signal::entry(SignalKind::OpenLong, None, None, "noise")))
            }
        }

        let mut frame = IndicatorFrame::from_bars(bars(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]), MAX_BARS);
        let mut strategy = Brittle { calls: 0 };
        let primed = prime_strategy(&mut strategy, &mut frame).unwrap();
        assert_eq!(strategy.calls, 6); // every row visited
        assert_eq!(primed, 3); // three head rows failed and were swallowed
    }
}
