// =============================================================================
// EMA Crossover — long when fast EMA crosses above slow EMA
// =============================================================================
//
// Entry: fast EMA crosses above slow EMA, with percentage stop and target.
// Exit: fast EMA crosses back below slow EMA.
//
// Crossover detection keeps the previous bar's EMA pair as internal state,
// which warmup primes by replaying history.
// =============================================================================

use anyhow::Result;

use crate::frame::{IndicatorFrame, Row};
use crate::indicators::ema_series;
use crate::position::Position;
use crate::strategy::{param, Params, Strategy};
use crate::types::{Signal, SignalKind};

pub struct EmaCross {
    params: Params,
    prev_fast: Option<f64>,
    prev_slow: Option<f64>,
}

impl EmaCross {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            prev_fast: None,
            prev_slow: None,
        }
    }

    fn fast_period(&self) -> usize {
        param(&self.params, "fast_period", 9.0) as usize
    }

    fn slow_period(&self) -> usize {
        param(&self.params, "slow_period", 21.0) as usize
    }

    fn fast_col(&self) -> String {
        format!("EMA_{}", self.fast_period())
    }

    fn slow_col(&self) -> String {
        format!("EMA_{}", self.slow_period())
    }
}

impl Strategy for EmaCross {
    fn name(&self) -> &'static str {
        "EMA Crossover"
    }

    fn setup(&mut self, frame: &mut IndicatorFrame) -> Result<()> {
        let closes = frame.closes();
        frame.set_column(self.fast_col(), ema_series(&closes, self.fast_period()));
        frame.set_column(self.slow_col(), ema_series(&closes, self.slow_period()));
        Ok(())
    }

    fn on_bar(
        &mut self,
        _idx: usize,
        row: &Row,
        position: Option<&Position>,
    ) -> Result<Option<Signal>> {
        let (Some(fast), Some(slow)) = (row.get(&self.fast_col()), row.get(&self.slow_col()))
        else {
            return Ok(None);
        };

        let close = row.close();

        // First computable bar only seeds the crossover state.
        let (Some(prev_fast), Some(prev_slow)) = (self.prev_fast, self.prev_slow) else {
            self.prev_fast = Some(fast);
            self.prev_slow = Some(slow);
            return Ok(None);
        };

        let cross_above = prev_fast <= prev_slow && fast > slow;
        let cross_below = prev_fast >= prev_slow && fast < slow;

        self.prev_fast = Some(fast);
        self.prev_slow = Some(slow);

        if position.is_none() && cross_above {
            let stop_pct = param(&self.params, "stop_loss_pct", 0.03);
            let target_pct = param(&self.params, "take_profit_pct", 0.06);
            return Ok(Some(Signal::entry(
                SignalKind::OpenLong,
                Some(close * (1.0 - stop_pct)),
                Some(close * (1.0 + target_pct)),
                format!("EMA crossover: {} crossed above {}", self.fast_col(), self.slow_col()),
            )));
        }

        if position.is_some() && cross_below {
            return Ok(Some(Signal {
                kind: SignalKind::CloseLong,
                stop_loss: None,
                take_profit: None,
                trailing_stop_distance: None,
                reason: format!(
                    "EMA crossunder: {} crossed below {}",
                    self.fast_col(),
                    self.slow_col()
                ),
            }));
        }

        Ok(None)
    }
}
