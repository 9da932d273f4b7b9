// =============================================================================
// Broker Adapter — the brokerage capability set consumed by the core
// =============================================================================
//
// The engine, warmup, reconciler, and supervisor all talk to the brokerage
// through this trait. Errors split into two kinds the callers branch on:
//
//   OrderRejected — the brokerage declined (risk, buying power, halted,
//                   malformed). Logged and journaled; no local position is
//                   opened and trading does not pause.
//   Unavailable   — network, timeout, auth, disconnect. Treated as transient
//                   on the trading path (skip this bar's action); the
//                   reconciler repairs any divergence once connectivity
//                   returns.

pub mod alpaca;

pub use alpaca::AlpacaBroker;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{AccountSnapshot, Bar, BrokerPosition, Order, Trade};

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The brokerage declined the order.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// The brokerage could not be reached or did not answer in time.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// A call was made before `connect()`.
    #[error("broker not connected")]
    NotConnected,

    /// The brokerage answered with something we could not interpret.
    #[error("unexpected broker response: {0}")]
    BadResponse(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Brokerage operations used by the core. All orders are market orders;
/// close kinds route to the "flatten this symbol" capability rather than an
/// opposite-side order.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> BrokerResult<()>;
    async fn disconnect(&self);

    /// Submit a market order and wait (bounded) for its fill.
    async fn submit_order(&self, order: &Order) -> BrokerResult<Trade>;

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<bool>;

    /// Cancel all open orders, optionally for one symbol. Returns the count.
    async fn cancel_all(&self, symbol: Option<&str>) -> BrokerResult<usize>;

    /// Flatten the symbol. `None` when the brokerage reports no position.
    async fn close_position(&self, symbol: &str) -> BrokerResult<Option<Trade>>;

    async fn get_position(&self, symbol: &str) -> BrokerResult<Option<BrokerPosition>>;
    async fn get_positions(&self) -> BrokerResult<Vec<BrokerPosition>>;
    async fn get_account(&self) -> BrokerResult<AccountSnapshot>;

    /// Historical bars, ascending by timestamp, at most `limit` of them.
    async fn get_bars(&self, symbol: &str, timeframe_minutes: u32, limit: usize)
        -> BrokerResult<Vec<Bar>>;

    async fn is_market_open(&self) -> BrokerResult<bool>;

    fn is_paper(&self) -> bool;
    fn is_connected(&self) -> bool;
}
