// =============================================================================
// Position — open exposure with stop-loss, take-profit, and trailing stop
// =============================================================================
//
// The engine checks these levels against every live bar as a safety net that
// runs in parallel with the brokerage's own stop handling. The "effective
// stop" is always the tighter of the static stop and the trailing stop, in
// the direction disadvantageous to the position, and can only ever tighten.
// =============================================================================

use chrono::{DateTime, Utc};

use crate::types::{Bar, Direction, Trade};

/// Which protective level fired first within a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTrigger {
    StopLoss,
    TakeProfit,
}

impl ExitTrigger {
    /// Reason tag recorded on the closing trade.
    pub fn reason(self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
        }
    }
}

/// An open position for one symbol. A symbol has at most one at a time.
#[derive(Debug, Clone)]
pub struct Position {
    pub trade: Trade,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub trailing_stop: Option<f64>,
    pub trailing_stop_distance: Option<f64>,
}

impl Position {
    pub fn new(
        trade: Trade,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        trailing_stop_distance: Option<f64>,
    ) -> Self {
        Self {
            trade,
            stop_loss,
            take_profit,
            trailing_stop: None,
            trailing_stop_distance,
        }
    }

    pub fn direction(&self) -> Direction {
        self.trade.direction
    }

    pub fn entry_price(&self) -> f64 {
        self.trade.entry_price
    }

    pub fn quantity(&self) -> f64 {
        self.trade.quantity
    }

    pub fn symbol(&self) -> &str {
        &self.trade.symbol
    }

    pub fn entry_time(&self) -> DateTime<Utc> {
        self.trade.entry_time
    }

    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        match self.direction() {
            Direction::Long => (current_price - self.entry_price()) * self.quantity(),
            Direction::Short => (self.entry_price() - current_price) * self.quantity(),
        }
    }

    /// Ratchet the trailing stop from the latest close. For longs the stop
    /// may only rise; for shorts it may only fall.
    pub fn update_trailing_stop(&mut self, current_price: f64) {
        let Some(distance) = self.trailing_stop_distance else {
            return;
        };

        match self.direction() {
            Direction::Long => {
                let new_stop = current_price - distance;
                if self.trailing_stop.map_or(true, |ts| new_stop > ts) {
                    self.trailing_stop = Some(new_stop);
                }
            }
            Direction::Short => {
                let new_stop = current_price + distance;
                if self.trailing_stop.map_or(true, |ts| new_stop < ts) {
                    self.trailing_stop = Some(new_stop);
                }
            }
        }
    }

    /// The tighter of the static stop and the trailing stop: `max` for longs,
    /// `min` for shorts.
    pub fn effective_stop(&self) -> Option<f64> {
        match (self.stop_loss, self.trailing_stop) {
            (Some(sl), Some(ts)) => Some(match self.direction() {
                Direction::Long => sl.max(ts),
                Direction::Short => sl.min(ts),
            }),
            (Some(sl), None) => Some(sl),
            (None, Some(ts)) => Some(ts),
            (None, None) => None,
        }
    }

    /// Whether the effective stop is hit somewhere within the bar's range.
    pub fn is_stop_hit(&self, bar_low: f64, bar_high: f64) -> bool {
        let Some(stop) = self.effective_stop() else {
            return false;
        };
        match self.direction() {
            Direction::Long => bar_low <= stop,
            Direction::Short => bar_high >= stop,
        }
    }

    /// Whether the take-profit is hit somewhere within the bar's range.
    pub fn is_target_hit(&self, bar_low: f64, bar_high: f64) -> bool {
        let Some(target) = self.take_profit else {
            return false;
        };
        match self.direction() {
            Direction::Long => bar_high >= target,
            Direction::Short => bar_low <= target,
        }
    }

    /// Determine which protective level fired first within `bar`.
    ///
    /// When both the stop and the target are hit inside the same bar, the
    /// level whose fill price is closer to the bar's open is deemed first;
    /// a tie goes to the stop.
    pub fn first_exit(&self, bar: &Bar) -> Option<ExitTrigger> {
        let stop_hit = self.is_stop_hit(bar.low, bar.high);
        let target_hit = self.is_target_hit(bar.low, bar.high);

        match (stop_hit, target_hit) {
            (false, false) => None,
            (true, false) => Some(ExitTrigger::StopLoss),
            (false, true) => Some(ExitTrigger::TakeProfit),
            (true, true) => {
                let stop = self.effective_stop().unwrap_or(bar.open);
                let target = self.take_profit.unwrap_or(bar.open);
                let stop_dist = (bar.open - stop).abs();
                let target_dist = (bar.open - target).abs();
                if stop_dist <= target_dist {
                    Some(ExitTrigger::StopLoss)
                } else {
                    Some(ExitTrigger::TakeProfit)
                }
            }
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

    fn position(direction: Direction, entry: f64, stop: Option<f64>, target: Option<f64>) -> Position {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        let trade = Trade::open(t0, "MSTR", direction, 10.0, entry, 0.0);
        Position::new(trade, stop, target, None)
    }

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 15, 5, 0).unwrap();
        Bar::new(ts, open, high, low, close, 100.0)
    }

    #[test]
    fn unrealized_pnl_by_direction() {
        let long = position(Direction::Long, 100.0, None, None);
        assert_eq!(long.unrealized_pnl(104.0), 40.0);
        assert_eq!(long.unrealized_pnl(98.0), -20.0);

        let short = position(Direction::Short, 100.0, None, None);
        assert_eq!(short.unrealized_pnl(104.0), -40.0);
        assert_eq!(short.unrealized_pnl(98.0), 20.0);
    }

    #[test]
    fn trailing_stop_only_tightens_long() {
        let mut pos = position(Direction::Long, 100.0, Some(98.0), None);
        pos.trailing_stop_distance = Some(2.0);

        pos.update_trailing_stop(103.0);
        assert_eq!(pos.trailing_stop, Some(101.0));

        // Price retraces — trailing stop must hold.
        pos.update_trailing_stop(101.0);
        assert_eq!(pos.trailing_stop, Some(101.0));

        pos.update_trailing_stop(105.0);
        assert_eq!(pos.trailing_stop, Some(103.0));
    }

    #[test]
    fn trailing_stop_only_tightens_short() {
        let mut pos = position(Direction::Short, 100.0, Some(102.0), None);
        pos.trailing_stop_distance = Some(2.0);

        pos.update_trailing_stop(97.0);
        assert_eq!(pos.trailing_stop, Some(99.0));

        pos.update_trailing_stop(99.0);
        assert_eq!(pos.trailing_stop, Some(99.0));

        pos.update_trailing_stop(95.0);
        assert_eq!(pos.trailing_stop, Some(97.0));
    }

    #[test]
    fn effective_stop_is_tighter_of_the_two() {
        let mut long = position(Direction::Long, 100.0, Some(98.0), None);
        long.trailing_stop = Some(99.0);
        assert_eq!(long.effective_stop(), Some(99.0));

        long.trailing_stop = Some(97.0);
        assert_eq!(long.effective_stop(), Some(98.0));

        let mut short = position(Direction::Short, 100.0, Some(102.0), None);
        short.trailing_stop = Some(101.0);
        assert_eq!(short.effective_stop(), Some(101.0));
    }

    #[test]
    fn effective_stop_falls_back_to_either_side() {
        let pos = position(Direction::Long, 100.0, None, None);
        assert_eq!(pos.effective_stop(), None);

        let pos = position(Direction::Long, 100.0, Some(98.0), None);
        assert_eq!(pos.effective_stop(), Some(98.0));

        let mut pos = position(Direction::Long, 100.0, None, None);
        pos.trailing_stop = Some(99.0);
        assert_eq!(pos.effective_stop(), Some(99.0));
    }

    #[test]
    fn stop_and_target_hit_detection() {
        let long = position(Direction::Long, 100.0, Some(98.0), Some(104.0));
        assert!(long.is_stop_hit(97.5, 100.0));
        assert!(!long.is_stop_hit(98.5, 100.0));
        assert!(long.is_target_hit(100.0, 104.5));
        assert!(!long.is_target_hit(100.0, 103.5));

        let short = position(Direction::Short, 100.0, Some(102.0), Some(96.0));
        assert!(short.is_stop_hit(100.0, 102.5));
        assert!(!short.is_stop_hit(100.0, 101.5));
        assert!(short.is_target_hit(95.5, 100.0));
        assert!(!short.is_target_hit(96.5, 100.0));
    }

    #[test]
    fn both_hit_stop_closer_to_open_wins() {
        // entry=100, stop=98, target=104; bar opens at 99 and spans both.
        // |99-98| = 1 < |99-104| = 5 => stop is deemed first.
        let pos = position(Direction::Long, 100.0, Some(98.0), Some(104.0));
        let b = bar(99.0, 105.0, 97.0, 103.0);
        assert!(pos.is_stop_hit(b.low, b.high));
        assert!(pos.is_target_hit(b.low, b.high));
        assert_eq!(pos.first_exit(&b), Some(ExitTrigger::StopLoss));
    }

    #[test]
    fn both_hit_target_closer_to_open_wins() {
        let pos = position(Direction::Long, 100.0, Some(98.0), Some(104.0));
        let b = bar(103.5, 105.0, 97.0, 98.5);
        assert_eq!(pos.first_exit(&b), Some(ExitTrigger::TakeProfit));
    }

    #[test]
    fn both_hit_tie_goes_to_stop() {
        // open=101, stop=98, target=104: both 3.0 away.
        let pos = position(Direction::Long, 100.0, Some(98.0), Some(104.0));
        let b = bar(101.0, 105.0, 97.0, 100.0);
        assert_eq!(pos.first_exit(&b), Some(ExitTrigger::StopLoss));
    }

    #[test]
    fn no_exit_when_levels_not_touched() {
        let pos = position(Direction::Long, 100.0, Some(98.0), Some(104.0));
        let b = bar(100.0, 102.0, 99.0, 101.0);
        assert_eq!(pos.first_exit(&b), None);
    }

    #[test]
    fn trailing_tightens_the_effective_stop_over_time() {
        let mut pos = position(Direction::Long, 100.0, Some(98.0), None);
        pos.trailing_stop_distance = Some(1.5);

        let mut prev = pos.effective_stop().unwrap();
        for close in [101.0, 102.5, 102.0, 104.0, 103.0] {
            pos.update_trailing_stop(close);
            let eff = pos.effective_stop().unwrap();
            assert!(eff >= prev, "effective stop regressed: {prev} -> {eff}");
            prev = eff;
        }
        assert_eq!(prev, 102.5); // 104.0 - 1.5
    }
}
