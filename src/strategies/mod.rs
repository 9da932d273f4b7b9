// =============================================================================
// Strategy Registry
// =============================================================================
//
// Strategies are instantiated by name from the config. Each engine slot gets
// its own instance so per-timeframe internal state never crosses wires.

use anyhow::{bail, Result};

use crate::strategy::{Params, Strategy};

pub mod ema_cross;
pub mod supertrend_momentum;

pub use ema_cross::EmaCross;
pub use supertrend_momentum::SupertrendMomentum;

/// Registered strategy names, as accepted in the config `strategy` field.
pub const AVAILABLE: &[&str] = &["supertrend_momentum", "ema_cross"];

/// Construct a strategy instance by registry name.
pub fn build(name: &str, params: &Params) -> Result<Box<dyn Strategy>> {
    match name {
        "supertrend_momentum" => Ok(Box::new(SupertrendMomentum::new(params.clone()))),
        "ema_cross" => Ok(Box::new(EmaCross::new(params.clone()))),
        other => bail!(
            "unknown strategy: {other} (available: {})",
            AVAILABLE.join(", ")
        ),
    }
}
