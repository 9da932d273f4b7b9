// =============================================================================
// Shared types used across the Meridian trading engine
// =============================================================================

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Bars and timeframes
// ---------------------------------------------------------------------------

/// A single OHLCV bar. Timestamps are UTC instants aligned to the bar's
/// window start. Bars are never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Parse a timeframe label ("1m", "2m", "5m", "10m", "1h") into minutes.
pub fn parse_timeframe(label: &str) -> Result<u32> {
    let label = label.trim();
    if let Some(mins) = label.strip_suffix('m') {
        let n: u32 = mins.parse()?;
        if n == 0 {
            bail!("timeframe must be >= 1 minute: {label}");
        }
        return Ok(n);
    }
    if let Some(hours) = label.strip_suffix('h') {
        let n: u32 = hours.parse()?;
        if n == 0 {
            bail!("timeframe must be >= 1 hour: {label}");
        }
        return Ok(n * 60);
    }
    bail!("unrecognised timeframe: {label} (expected e.g. \"5m\" or \"1h\")")
}

/// Render minutes back to the canonical label used in logs and the database.
pub fn format_timeframe(minutes: u32) -> String {
    if minutes % 60 == 0 && minutes >= 60 {
        format!("{}h", minutes / 60)
    } else {
        format!("{minutes}m")
    }
}

// ---------------------------------------------------------------------------
// Directions and signals
// ---------------------------------------------------------------------------

/// Side of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// What a strategy wants done, as a closed enumeration. Entry kinds carry
/// stop/target levels on the surrounding [`Signal`]; close kinds and `Flat`
/// ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    Flat,
}

impl SignalKind {
    /// True for kinds that open new exposure.
    pub fn is_entry(self) -> bool {
        matches!(self, Self::OpenLong | Self::OpenShort)
    }

    /// True for kinds that reduce to flat (close or explicit flat).
    pub fn is_exit(self) -> bool {
        matches!(self, Self::CloseLong | Self::CloseShort | Self::Flat)
    }

    /// Direction of the position this kind would open, if it is an entry.
    pub fn entry_direction(self) -> Option<Direction> {
        match self {
            Self::OpenLong => Some(Direction::Long),
            Self::OpenShort => Some(Direction::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenLong => write!(f, "long"),
            Self::OpenShort => write!(f, "short"),
            Self::CloseLong => write!(f, "close_long"),
            Self::CloseShort => write!(f, "close_short"),
            Self::Flat => write!(f, "flat"),
        }
    }
}

/// A trading signal emitted by a strategy for one bar. Consumed by the engine
/// and never stored past the arbitration that follows the bar.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub trailing_stop_distance: Option<f64>,
    pub reason: String,
}

impl Signal {
    /// Entry signal with stop/target levels.
    pub fn entry(
        kind: SignalKind,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            stop_loss,
            take_profit,
            trailing_stop_distance: None,
            reason: reason.into(),
        }
    }

    /// Close signal for a position currently open in `direction`.
    pub fn close(direction: Direction, reason: impl Into<String>) -> Self {
        let kind = match direction {
            Direction::Long => SignalKind::CloseLong,
            Direction::Short => SignalKind::CloseShort,
        };
        Self {
            kind,
            stop_loss: None,
            take_profit: None,
            trailing_stop_distance: None,
            reason: reason.into(),
        }
    }

    pub fn with_trailing(mut self, distance: f64) -> Self {
        self.trailing_stop_distance = Some(distance);
        self
    }
}

// ---------------------------------------------------------------------------
// Orders and trades
// ---------------------------------------------------------------------------

/// A market order handed to the broker adapter. Close kinds route to the
/// broker's flatten capability rather than an opposite-side order.
#[derive(Debug, Clone)]
pub struct Order {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub kind: SignalKind,
    pub quantity: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub reason: String,
}

/// An executed fill pair. Created open by the broker adapter on a fill;
/// closed by the engine when the position exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub entry_time: DateTime<Utc>,
    pub symbol: String,
    pub direction: Direction,
    pub quantity: f64,
    pub entry_price: f64,
    pub commission: f64,
    pub slippage: f64,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_reason: Option<String>,
    #[serde(default)]
    pub pnl: Option<f64>,
}

impl Trade {
    pub fn open(
        entry_time: DateTime<Utc>,
        symbol: impl Into<String>,
        direction: Direction,
        quantity: f64,
        entry_price: f64,
        commission: f64,
    ) -> Self {
        Self {
            entry_time,
            symbol: symbol.into(),
            direction,
            quantity,
            entry_price,
            commission,
            slippage: 0.0,
            exit_time: None,
            exit_price: None,
            exit_reason: None,
            pnl: None,
        }
    }

    /// Mark the trade closed and record its realized P&L.
    pub fn close(
        &mut self,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        exit_reason: impl Into<String>,
    ) {
        let direction = match self.direction {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        };
        self.exit_time = Some(exit_time);
        self.exit_price = Some(exit_price);
        self.exit_reason = Some(exit_reason.into());
        self.pnl = Some(direction * (exit_price - self.entry_price) * self.quantity);
    }

    pub fn is_closed(&self) -> bool {
        self.exit_time.is_some()
    }
}

// ---------------------------------------------------------------------------
// Broker views
// ---------------------------------------------------------------------------

/// Account snapshot from the brokerage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub cash: f64,
    pub equity: f64,
    pub buying_power: f64,
    pub regt_buying_power: f64,
    pub daytrading_buying_power: f64,
    pub non_marginable_buying_power: f64,
    /// Equity at the previous close — used as the initial-capital proxy.
    pub last_equity: f64,
    pub daytrade_count: u32,
    pub pattern_day_trader: bool,
    pub multiplier: u32,
    pub trading_blocked: bool,
    pub currency: String,
    pub status: String,
}

/// The brokerage's authoritative view of one symbol's position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: f64,
    pub avg_price: f64,
    pub side: Direction,
    pub unrealized_pnl: f64,
    pub market_value: f64,
    pub current_price: f64,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timeframe_parsing() {
        assert_eq!(parse_timeframe("1m").unwrap(), 1);
        assert_eq!(parse_timeframe("5m").unwrap(), 5);
        assert_eq!(parse_timeframe("10m").unwrap(), 10);
        assert_eq!(parse_timeframe("1h").unwrap(), 60);
        assert!(parse_timeframe("0m").is_err());
        assert!(parse_timeframe("5x").is_err());
        assert!(parse_timeframe("").is_err());
    }

    #[test]
    fn timeframe_formatting_roundtrip() {
        for label in ["1m", "2m", "5m", "10m", "30m", "1h", "2h"] {
            let minutes = parse_timeframe(label).unwrap();
            assert_eq!(format_timeframe(minutes), label);
        }
    }

    #[test]
    fn signal_kind_classification() {
        assert!(SignalKind::OpenLong.is_entry());
        assert!(SignalKind::OpenShort.is_entry());
        assert!(!SignalKind::CloseLong.is_entry());
        assert!(SignalKind::CloseLong.is_exit());
        assert!(SignalKind::CloseShort.is_exit());
        assert!(SignalKind::Flat.is_exit());
        assert_eq!(
            SignalKind::OpenLong.entry_direction(),
            Some(Direction::Long)
        );
        assert_eq!(SignalKind::Flat.entry_direction(), None);
    }

    #[test]
    fn close_signal_matches_position_direction() {
        let sig = Signal::close(Direction::Long, "end of session");
        assert_eq!(sig.kind, SignalKind::CloseLong);
        let sig = Signal::close(Direction::Short, "stop_loss");
        assert_eq!(sig.kind, SignalKind::CloseShort);
    }

    #[test]
    fn trade_close_computes_pnl() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        let mut trade = Trade::open(t0, "MSTR", Direction::Long, 10.0, 100.0, 0.0);
        assert!(!trade.is_closed());

        trade.close(t0, 104.0, "take_profit");
        assert!(trade.is_closed());
        assert_eq!(trade.pnl, Some(40.0));

        let mut short = Trade::open(t0, "MSTR", Direction::Short, 10.0, 100.0, 0.0);
        short.close(t0, 104.0, "stop_loss");
        assert_eq!(short.pnl, Some(-40.0));
    }
}
