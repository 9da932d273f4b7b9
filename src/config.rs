// =============================================================================
// Bot Configuration — JSON file + environment overrides
// =============================================================================
//
// Every field carries `#[serde(default)]` so that adding new fields never
// breaks loading an older config file. Secrets (API keys, paper flag) are
// overridable from the environment and should normally come from there.
// A missing or malformed config file is a fatal startup error.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::parse_timeframe;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_pct_equity() -> f64 {
    0.90
}

fn default_fixed_size() -> f64 {
    10_000.0
}

fn default_risk_pct() -> f64 {
    0.02
}

fn default_max_daily_loss() -> f64 {
    3_000.0
}

fn default_max_drawdown_pct() -> f64 {
    15.0
}

fn default_max_position_value_pct() -> f64 {
    0.90
}

fn default_max_positions() -> u32 {
    1
}

fn default_max_total_positions() -> u32 {
    2
}

fn default_max_total_exposure_pct() -> f64 {
    1.5
}

fn default_min_equity_for_trading() -> f64 {
    25_000.0
}

fn default_timeframes() -> Vec<String> {
    vec!["5m".to_string()]
}

fn default_db_path() -> String {
    "data/trading.db".to_string()
}

fn default_report_dir() -> String {
    "data/reports".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_warmup_bars() -> usize {
    200
}

fn default_reconnect_initial_secs() -> u64 {
    3
}

fn default_reconnect_max_secs() -> u64 {
    60
}

fn default_reconnect_attempts() -> u32 {
    10
}

fn default_feed_source() -> String {
    "iex".to_string()
}

// =============================================================================
// Sizing
// =============================================================================

/// How the desired position value is derived before risk caps apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    Fixed,
    Percent,
    RiskBased,
}

impl Default for SizingMode {
    fn default() -> Self {
        Self::Percent
    }
}

impl std::fmt::Display for SizingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Percent => write!(f, "percent"),
            Self::RiskBased => write!(f, "risk_based"),
        }
    }
}

// =============================================================================
// Per-symbol strategy configuration
// =============================================================================

/// Configuration for one symbol's strategy across its timeframes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Registry name of the strategy (e.g. "supertrend_momentum").
    pub strategy: String,

    /// Ordered list of bar timeframes the strategy runs on (length >= 1).
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,

    /// Parameter overrides passed through to the strategy.
    #[serde(default)]
    pub params: HashMap<String, f64>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Discard short-side signals for this symbol.
    #[serde(default)]
    pub long_only: bool,
}

impl StrategyConfig {
    /// Parse the configured timeframe labels into minutes, preserving order.
    pub fn timeframe_minutes(&self) -> Result<Vec<u32>> {
        self.timeframes.iter().map(|tf| parse_timeframe(tf)).collect()
    }
}

// =============================================================================
// Risk configuration
// =============================================================================

/// Account-level risk limits enforced by the risk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Pause trading for the day once daily loss exceeds this ($).
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,

    /// Circuit breaker: pause when drawdown from peak equity exceeds this (%).
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,

    /// Max position value as a fraction of equity.
    #[serde(default = "default_max_position_value_pct")]
    pub max_position_value_pct: f64,

    /// Max concurrent positions per symbol (held at 1, matching the backtest).
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,

    /// Max concurrent open positions across all symbols.
    #[serde(default = "default_max_total_positions")]
    pub max_total_positions: u32,

    /// Total exposure cap as a fraction of equity (1.5 = 150% with margin).
    #[serde(default = "default_max_total_exposure_pct")]
    pub max_total_exposure_pct: f64,

    /// PDT floor: pause when equity drops below this ($). 0 disables.
    #[serde(default = "default_min_equity_for_trading")]
    pub min_equity_for_trading: f64,

    /// Validate Reg-T buying power before admitting entries.
    #[serde(default = "default_true")]
    pub enforce_buying_power: bool,

    /// Reject entries outside regular market hours. Off allows extended-hours
    /// paper experiments.
    #[serde(default = "default_true")]
    pub enforce_market_hours: bool,

    /// Bars to wait after a stop-out before re-entry (strategy-level).
    #[serde(default)]
    pub cooldown_after_stop: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: default_max_daily_loss(),
            max_drawdown_pct: default_max_drawdown_pct(),
            max_position_value_pct: default_max_position_value_pct(),
            max_positions: default_max_positions(),
            max_total_positions: default_max_total_positions(),
            max_total_exposure_pct: default_max_total_exposure_pct(),
            min_equity_for_trading: default_min_equity_for_trading(),
            enforce_buying_power: true,
            enforce_market_hours: true,
            cooldown_after_stop: 0,
        }
    }
}

// =============================================================================
// Feed configuration
// =============================================================================

/// WebSocket feed reconnection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_source")]
    pub source: String,

    #[serde(default = "default_reconnect_initial_secs")]
    pub reconnect_initial_secs: u64,

    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,

    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            source: default_feed_source(),
            reconnect_initial_secs: default_reconnect_initial_secs(),
            reconnect_max_secs: default_reconnect_max_secs(),
            reconnect_attempts: default_reconnect_attempts(),
        }
    }
}

// =============================================================================
// BotConfig
// =============================================================================

/// Top-level configuration for the Meridian engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    // --- Broker credentials -------------------------------------------------
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub secret_key: String,

    #[serde(default = "default_true")]
    pub paper_trading: bool,

    // --- Strategies: symbol -> config ---------------------------------------
    #[serde(default)]
    pub strategies: HashMap<String, StrategyConfig>,

    // --- Position sizing ----------------------------------------------------
    #[serde(default)]
    pub position_sizing: SizingMode,

    #[serde(default = "default_pct_equity")]
    pub pct_equity: f64,

    #[serde(default = "default_fixed_size")]
    pub fixed_size: f64,

    #[serde(default = "default_risk_pct")]
    pub risk_pct: f64,

    // --- Risk ---------------------------------------------------------------
    #[serde(default)]
    pub risk: RiskConfig,

    // --- Storage ------------------------------------------------------------
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_report_dir")]
    pub report_dir: String,

    // --- Operational --------------------------------------------------------
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_file: Option<String>,

    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    #[serde(default = "default_warmup_bars")]
    pub warmup_bars: usize,

    #[serde(default)]
    pub feed: FeedConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            paper_trading: true,
            strategies: HashMap::new(),
            position_sizing: SizingMode::Percent,
            pct_equity: default_pct_equity(),
            fixed_size: default_fixed_size(),
            risk_pct: default_risk_pct(),
            risk: RiskConfig::default(),
            db_path: default_db_path(),
            report_dir: default_report_dir(),
            log_level: default_log_level(),
            log_file: None,
            reconcile_interval_secs: default_reconcile_interval_secs(),
            warmup_bars: default_warmup_bars(),
            feed: FeedConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a JSON file, then apply environment overrides.
    ///
    /// Environment variables always win over file values:
    /// `ALPACA_API_KEY`, `ALPACA_SECRET_KEY`, `BOT_PAPER_TRADING`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        config.apply_env_overrides();

        info!(
            path = %path.display(),
            symbols = ?config.strategies.keys().collect::<Vec<_>>(),
            paper = config.paper_trading,
            "config loaded"
        );

        Ok(config)
    }

    /// Pull secrets and the paper flag from the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("ALPACA_API_KEY") {
            if !key.is_empty() {
                self.api_key = key;
            }
        }
        if let Ok(secret) = std::env::var("ALPACA_SECRET_KEY") {
            if !secret.is_empty() {
                self.secret_key = secret;
            }
        }
        if let Ok(paper) = std::env::var("BOT_PAPER_TRADING") {
            self.paper_trading = matches!(paper.to_lowercase().as_str(), "true" | "1" | "yes");
        }
    }

    /// Validate invariants that would otherwise fail deep inside startup.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() || self.secret_key.is_empty() {
            bail!(
                "broker API keys not set — set ALPACA_API_KEY and ALPACA_SECRET_KEY \
                 or put them in the config file"
            );
        }
        for (symbol, strat) in &self.strategies {
            if strat.timeframes.is_empty() {
                bail!("{symbol}: timeframes list must not be empty");
            }
            strat
                .timeframe_minutes()
                .with_context(|| format!("{symbol}: bad timeframe"))?;
        }
        if !(0.0..=1.0).contains(&self.pct_equity) {
            bail!("pct_equity must be in [0, 1], got {}", self.pct_equity);
        }
        Ok(())
    }

    /// Strategies that are enabled, in symbol order.
    pub fn enabled_strategies(&self) -> Vec<(&String, &StrategyConfig)> {
        let mut enabled: Vec<_> = self
            .strategies
            .iter()
            .filter(|(_, s)| s.enabled)
            .collect();
        enabled.sort_by(|a, b| a.0.cmp(b.0));
        enabled
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = BotConfig::default();
        assert!(cfg.paper_trading);
        assert_eq!(cfg.position_sizing, SizingMode::Percent);
        assert!((cfg.pct_equity - 0.90).abs() < f64::EPSILON);
        assert!((cfg.fixed_size - 10_000.0).abs() < f64::EPSILON);
        assert!((cfg.risk.max_daily_loss - 3_000.0).abs() < f64::EPSILON);
        assert!((cfg.risk.max_drawdown_pct - 15.0).abs() < f64::EPSILON);
        assert!((cfg.risk.min_equity_for_trading - 25_000.0).abs() < f64::EPSILON);
        assert!(cfg.risk.enforce_buying_power);
        assert!(cfg.risk.enforce_market_hours);
        assert_eq!(cfg.risk.max_positions, 1);
        assert_eq!(cfg.reconcile_interval_secs, 300);
        assert_eq!(cfg.warmup_bars, 200);
        assert_eq!(cfg.feed.reconnect_initial_secs, 3);
        assert_eq!(cfg.feed.reconnect_max_secs, 60);
        assert_eq!(cfg.feed.reconnect_attempts, 10);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: BotConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.paper_trading);
        assert_eq!(cfg.position_sizing, SizingMode::Percent);
        assert!(cfg.strategies.is_empty());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "paper_trading": false,
            "position_sizing": "risk_based",
            "strategies": {
                "MSTR": { "strategy": "supertrend_momentum", "timeframes": ["2m", "5m", "10m"] }
            }
        }"#;
        let cfg: BotConfig = serde_json::from_str(json).unwrap();
        assert!(!cfg.paper_trading);
        assert_eq!(cfg.position_sizing, SizingMode::RiskBased);
        let strat = &cfg.strategies["MSTR"];
        assert!(strat.enabled);
        assert!(!strat.long_only);
        assert_eq!(strat.timeframe_minutes().unwrap(), vec![2, 5, 10]);
    }

    #[test]
    fn validate_rejects_missing_keys() {
        let cfg = BotConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_timeframe() {
        let json = r#"{
            "api_key": "k", "secret_key": "s",
            "strategies": { "MSTR": { "strategy": "ema_cross", "timeframes": ["5x"] } }
        }"#;
        let cfg: BotConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn enabled_strategies_filters_and_sorts() {
        let json = r#"{
            "api_key": "k", "secret_key": "s",
            "strategies": {
                "PLTR": { "strategy": "ema_cross", "enabled": false },
                "MSTR": { "strategy": "supertrend_momentum" },
                "AAPL": { "strategy": "ema_cross" }
            }
        }"#;
        let cfg: BotConfig = serde_json::from_str(json).unwrap();
        let enabled = cfg.enabled_strategies();
        let symbols: Vec<&str> = enabled.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSTR"]);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = BotConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: BotConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.paper_trading, cfg2.paper_trading);
        assert_eq!(cfg.position_sizing, cfg2.position_sizing);
        assert_eq!(cfg.reconcile_interval_secs, cfg2.reconcile_interval_secs);
    }
}
