// =============================================================================
// Strategy API — the capability set every trading strategy implements
// =============================================================================
//
// A strategy is a stateful unit driven one bar at a time:
//
//   setup(frame)    — recompute indicator columns over the retained window.
//                     Must be idempotent; the engine calls it on every bar.
//   on_bar(...)     — evaluate the latest row and optionally emit a Signal.
//                     Only the current row and the strategy's own accumulated
//                     state may be consulted (no look-ahead, no wall clock —
//                     warmup replays history and must land in the same state
//                     a continuously-running instance would have).
//   on_trade_closed — notification after a position closes, for adaptive
//                     state such as stop-out cooldowns.
//
// Instances are constructed through the registry in `strategies::build`, not
// loaded from files at runtime.
// =============================================================================

use std::collections::HashMap;

use anyhow::Result;

use crate::frame::{IndicatorFrame, Row};
use crate::position::Position;
use crate::types::{Signal, Trade};

/// Strategy parameter overrides. All tunables are numeric; booleans are
/// encoded as 0.0 / 1.0.
pub type Params = HashMap<String, f64>;

/// Read a parameter with a default.
pub fn param(params: &Params, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

/// The fixed capability set of a trading strategy.
pub trait Strategy: Send {
    /// Display name for logs and reports.
    fn name(&self) -> &'static str;

    /// Attach (recompute) indicator columns on the frame.
    fn setup(&mut self, frame: &mut IndicatorFrame) -> Result<()>;

    /// Evaluate the row at `idx` and optionally emit a signal. `position` is
    /// the symbol's current open position, if any.
    fn on_bar(&mut self, idx: usize, row: &Row, position: Option<&Position>)
        -> Result<Option<Signal>>;

    /// Called after a trade on this symbol closes, on every timeframe's
    /// instance, so all internal state sees the outcome.
    fn on_trade_closed(&mut self, _trade: &Trade) {}
}
