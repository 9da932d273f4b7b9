// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator implementations used by the strategies.
// Every function returns a full series with exactly one value per input bar;
// positions that cannot be computed yet (insufficient look-back) hold NaN.
// This keeps the series directly installable as indicator-frame columns.

pub mod adx;
pub mod atr;
pub mod ema;
pub mod rsi;
pub mod supertrend;

pub use adx::adx_series;
pub use atr::{atr_series, sma_series};
pub use ema::ema_series;
pub use rsi::rsi_series;
pub use supertrend::{supertrend_series, SuperTrend};
