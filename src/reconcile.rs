// =============================================================================
// Reconciler — three-way diff between local and brokerage position state
// =============================================================================
//
// Handles missed fills, manual trades placed outside the bot, and restarts.
//
// SAFETY POLICY: when both sides hold a position and they differ, the
// mismatch is reported but **never** auto-corrected — an operator must
// resolve it. The two one-sided cases are repaired automatically: the local
// state adopts the broker's position, or drops a position the broker no
// longer has.
// =============================================================================

use chrono::Utc;
use tracing::{info, warn};

use crate::position::Position;
use crate::types::{BrokerPosition, Trade};

/// Quantities within this tolerance are considered equal (fractional shares).
const QTY_TOLERANCE: f64 = 0.01;

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// The four-way (plus agreement split) result of comparing local state with
/// the broker's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Both flat.
    AgreeFlat,
    /// Both hold the same position (direction matches, quantity within
    /// tolerance).
    AgreeMatch,
    /// Both hold positions but they differ — report only, no action.
    Mismatch,
    /// Broker has a position we do not — adopt it locally.
    AdoptBroker,
    /// We hold a position the broker does not — drop the local one.
    ClearLocal,
}

impl ReconcileOutcome {
    pub fn is_match(self) -> bool {
        matches!(self, Self::AgreeFlat | Self::AgreeMatch)
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AgreeFlat => write!(f, "agree_flat"),
            Self::AgreeMatch => write!(f, "agree_match"),
            Self::Mismatch => write!(f, "mismatch"),
            Self::AdoptBroker => write!(f, "adopt_broker"),
            Self::ClearLocal => write!(f, "clear_local"),
        }
    }
}

/// Result of one reconciliation pass for a symbol.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub outcome: ReconcileOutcome,
    pub details: String,
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Compare the local position with the broker's view and decide what, if
/// anything, should happen. Pure — the engine applies the outcome.
pub fn reconcile_positions(
    symbol: &str,
    local: Option<&Position>,
    broker: Option<&BrokerPosition>,
) -> ReconcileReport {
    match (local, broker) {
        (None, None) => ReconcileReport {
            outcome: ReconcileOutcome::AgreeFlat,
            details: format!("{symbol}: flat (agreed)"),
        },

        (Some(local), Some(broker)) => {
            let qty_close = (local.quantity() - broker.qty).abs() < QTY_TOLERANCE;
            if local.direction() == broker.side && qty_close {
                ReconcileReport {
                    outcome: ReconcileOutcome::AgreeMatch,
                    details: format!(
                        "{symbol}: {} {:.0} (agreed)",
                        local.direction(),
                        local.quantity()
                    ),
                }
            } else {
                let report = ReconcileReport {
                    outcome: ReconcileOutcome::Mismatch,
                    details: format!(
                        "{symbol}: MISMATCH, local={} {:.0}, broker={} {:.0}",
                        local.direction(),
                        local.quantity(),
                        broker.side,
                        broker.qty
                    ),
                };
                warn!(symbol, details = %report.details, "reconciliation mismatch, manual action required");
                report
            }
        }

        (None, Some(broker)) => ReconcileReport {
            outcome: ReconcileOutcome::AdoptBroker,
            details: format!(
                "{symbol}: broker has {} {:.0} @ ${:.2}, local is flat, adopting broker position",
                broker.side, broker.qty, broker.avg_price
            ),
        },

        (Some(local), None) => ReconcileReport {
            outcome: ReconcileOutcome::ClearLocal,
            details: format!(
                "{symbol}: local has {} {:.0}, broker is flat, clearing local state",
                local.direction(),
                local.quantity()
            ),
        },
    }
}

/// Build a local [`Position`] from the broker's view. Stop-loss and
/// take-profit start unset — the strategy reasserts them on the next bar.
pub fn adopt_broker_position(broker_pos: &BrokerPosition) -> Position {
    let trade = Trade::open(
        Utc::now(),
        broker_pos.symbol.clone(),
        broker_pos.side,
        broker_pos.qty,
        broker_pos.avg_price,
        0.0,
    );

    info!(
        symbol = %broker_pos.symbol,
        side = %broker_pos.side,
        qty = broker_pos.qty,
        avg_price = broker_pos.avg_price,
        "adopted broker position"
    );

    Position::new(trade, None, None, None)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use chrono::TimeZone;

    fn local(direction: Direction, qty: f64) -> Position {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        let trade = Trade::open(t0, "MSTR", direction, qty, 200.0, 0.0);
        Position::new(trade, Some(195.0), Some(210.0), None)
    }

    fn broker(side: Direction, qty: f64, avg_price: f64) -> BrokerPosition {
        BrokerPosition {
            symbol: "MSTR".to_string(),
            qty,
            avg_price,
            side,
            unrealized_pnl: 0.0,
            market_value: qty * avg_price,
            current_price: avg_price,
        }
    }

    #[test]
    fn both_flat_agree() {
        let report = reconcile_positions("MSTR", None, None);
        assert_eq!(report.outcome, ReconcileOutcome::AgreeFlat);
        assert!(report.outcome.is_match());
    }

    #[test]
    fn matching_positions_agree() {
        let pos = local(Direction::Long, 10.0);
        let bpos = broker(Direction::Long, 10.0, 200.0);
        let report = reconcile_positions("MSTR", Some(&pos), Some(&bpos));
        assert_eq!(report.outcome, ReconcileOutcome::AgreeMatch);
    }

    #[test]
    fn quantity_within_tolerance_matches() {
        let pos = local(Direction::Long, 10.0);
        let bpos = broker(Direction::Long, 10.005, 200.0);
        let report = reconcile_positions("MSTR", Some(&pos), Some(&bpos));
        assert_eq!(report.outcome, ReconcileOutcome::AgreeMatch);
    }

    #[test]
    fn quantity_divergence_is_mismatch() {
        let pos = local(Direction::Long, 10.0);
        let bpos = broker(Direction::Long, 12.0, 200.0);
        let report = reconcile_positions("MSTR", Some(&pos), Some(&bpos));
        assert_eq!(report.outcome, ReconcileOutcome::Mismatch);
        assert!(!report.outcome.is_match());
    }

    #[test]
    fn direction_divergence_is_mismatch() {
        let pos = local(Direction::Long, 10.0);
        let bpos = broker(Direction::Short, 10.0, 200.0);
        let report = reconcile_positions("MSTR", Some(&pos), Some(&bpos));
        assert_eq!(report.outcome, ReconcileOutcome::Mismatch);
    }

    #[test]
    fn broker_only_adopts() {
        // Local flat, broker long 10 @ 200: adopt with stops unset; the
        // strategy may re-attach them on the next bar.
        let bpos = broker(Direction::Long, 10.0, 200.0);
        let report = reconcile_positions("MSTR", None, Some(&bpos));
        assert_eq!(report.outcome, ReconcileOutcome::AdoptBroker);

        let adopted = adopt_broker_position(&bpos);
        assert_eq!(adopted.direction(), Direction::Long);
        assert_eq!(adopted.quantity(), 10.0);
        assert_eq!(adopted.entry_price(), 200.0);
        assert_eq!(adopted.stop_loss, None);
        assert_eq!(adopted.take_profit, None);
        assert_eq!(adopted.trailing_stop, None);
    }

    #[test]
    fn local_only_clears() {
        let pos = local(Direction::Short, 5.0);
        let report = reconcile_positions("MSTR", Some(&pos), None);
        assert_eq!(report.outcome, ReconcileOutcome::ClearLocal);
    }
}
