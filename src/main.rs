// =============================================================================
// Meridian — live multi-timeframe equities trading engine
// =============================================================================
//
// CLI entry point. `start` runs the supervisor until a shutdown signal; the
// other subcommands are one-shot inspection and test tools.
//
// Exit codes: 0 normal, 1 misconfiguration, 2 runtime error before
// supervision started.
// =============================================================================

mod broker;
mod config;
mod engine;
mod feeds;
mod frame;
mod indicators;
mod position;
mod reconcile;
mod report;
mod risk;
mod session;
mod storage;
mod strategies;
mod strategy;
mod supervisor;
mod types;
mod warmup;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::BotConfig;
use crate::types::parse_timeframe;

#[derive(Parser)]
#[command(name = "meridian", version, about = "Live multi-timeframe equities trading bot")]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, short, global = true, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the trading bot (paper unless --live).
    Start {
        /// Trade against the live account instead of paper.
        #[arg(long)]
        live: bool,
    },
    /// Show the account snapshot.
    Account,
    /// List recent trades from the trade log.
    Trades {
        /// Only trades entered today.
        #[arg(long)]
        today: bool,
        /// Maximum rows to show.
        #[arg(long, short = 'n', default_value_t = 50)]
        limit: usize,
    },
    /// Aggregate statistics over closed trades.
    Stats,
    /// Fetch and display recent bars for a symbol.
    Bars {
        symbol: String,
        /// Bar timeframe, e.g. 2m, 5m, 1h.
        #[arg(long, short = 't', default_value = "5m")]
        timeframe: String,
        /// Number of bars.
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: usize,
    },
    /// Submit and immediately flatten a 1-share test order (paper only).
    TestOrder {
        #[arg(long, short = 't', default_value = "AAPL")]
        ticker: String,
        #[arg(long, short = 'q', default_value_t = 1.0)]
        qty: f64,
    },
}

fn init_logging(config: &BotConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    match config.log_file.as_deref() {
        Some(path) => {
            if let Some(parent) = std::path::Path::new(path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    tracing_subscriber::fmt()
                        .with_env_filter(filter)
                        .with_writer(std::sync::Arc::new(file))
                        .with_ansi(false)
                        .init();
                }
                Err(e) => {
                    tracing_subscriber::fmt().with_env_filter(filter).init();
                    tracing::warn!(path, error = %e, "log file unavailable, logging to stdout");
                }
            }
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _ = dotenv::dotenv();

    // ConfigError is fatal at startup only.
    let mut config = match BotConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e:#}");
            return ExitCode::from(1);
        }
    };
    init_logging(&config);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("runtime error: {e}");
            return ExitCode::from(2);
        }
    };

    let result = match cli.command {
        Command::Start { live } => {
            if live {
                config.paper_trading = false;
            }
            if let Err(e) = config.validate() {
                eprintln!("config error: {e:#}");
                return ExitCode::from(1);
            }
            runtime.block_on(supervisor::run_bot(config))
        }
        Command::Account => runtime.block_on(supervisor::show_account(&config)),
        Command::Trades { today, limit } => {
            runtime.block_on(supervisor::show_trades(&config, today, limit))
        }
        Command::Stats => runtime.block_on(supervisor::show_stats(&config)),
        Command::Bars {
            symbol,
            timeframe,
            limit,
        } => {
            let minutes = match parse_timeframe(&timeframe) {
                Ok(minutes) => minutes,
                Err(e) => {
                    eprintln!("config error: {e}");
                    return ExitCode::from(1);
                }
            };
            runtime.block_on(supervisor::show_bars(&config, &symbol, minutes, limit))
        }
        Command::TestOrder { ticker, qty } => {
            config.paper_trading = true; // never test against live
            runtime.block_on(supervisor::test_order(&config, &ticker, qty))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "command failed");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
