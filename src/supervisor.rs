// =============================================================================
// Supervisor — boots components, owns lifecycle, handles shutdown
// =============================================================================
//
// Startup: connect broker -> fetch account -> risk manager -> persistence ->
// per symbol: build + warm strategies per timeframe, spawn engine, initial
// reconcile -> wire feed aggregators -> start feed, router, and periodic
// reconcile tasks -> await shutdown signal.
//
// Shutdown: deactivate engines (no new entries) -> stop feed (flushing
// partial windows) and reconcile loop -> brief quiesce -> cancel pending
// broker orders -> final account snapshot + daily P&L upsert -> stop engine
// tasks -> close feed, broker, persistence -> write the daily report.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::broker::{AlpacaBroker, Broker};
use crate::config::BotConfig;
use crate::engine::{EngineHandle, MultiTimeframeEngine, SizingParams, TimeframeSlot};
use crate::feeds::{FeedBar, MarketFeed};
use crate::report::DailyReport;
use crate::risk::RiskManager;
use crate::session::SessionFilter;
use crate::storage::{DailyPnlRecord, Database};
use crate::strategies;
use crate::types::{format_timeframe, AccountSnapshot, Order, SignalKind};
use crate::warmup::warmup_strategy;

/// Main bot loop: connect, warm up, stream bars, trade, shut down cleanly.
pub async fn run_bot(config: BotConfig) -> Result<()> {
    let mode = if config.paper_trading { "PAPER" } else { "LIVE" };
    info!(mode, "=== trading bot starting ===");

    config.validate()?;

    let enabled = config.enabled_strategies();
    if enabled.is_empty() {
        bail!("no strategies enabled in config");
    }

    // ── Broker + account ────────────────────────────────────────────────
    let broker: Arc<dyn Broker> = Arc::new(AlpacaBroker::new(
        &config.api_key,
        &config.secret_key,
        config.paper_trading,
    ));
    broker.connect().await.context("broker connection failed")?;
    let account = broker.get_account().await?;

    let report = Arc::new(DailyReport::new(&config.report_dir));
    report.set_account_start(account.clone());
    report.log_status(format!("Bot started ({mode} mode)"));
    print_banner(mode, &account, &config);

    // ── Risk manager + persistence ──────────────────────────────────────
    let session = SessionFilter::new();
    let risk = Arc::new(RiskManager::new(config.risk.clone(), account.equity, session));
    let db = Arc::new(Database::open(&config.db_path)?);

    let sizing = SizingParams {
        mode: config.position_sizing,
        pct_equity: config.pct_equity,
        fixed_size: config.fixed_size,
        risk_pct: config.risk_pct,
    };

    // ── Engines, one per symbol ─────────────────────────────────────────
    let mut feed = MarketFeed::new(&config.api_key, &config.secret_key, config.feed.clone());
    let mut handles: HashMap<String, EngineHandle> = HashMap::new();

    for (symbol, strat_config) in &enabled {
        let timeframes = strat_config.timeframe_minutes()?;
        let tf_labels: Vec<String> = timeframes.iter().map(|&tf| format_timeframe(tf)).collect();
        info!(symbol = %symbol, timeframes = ?tf_labels, strategy = %strat_config.strategy, "setting up symbol");

        // Risk-level stop-out cooldown flows into the strategy unless the
        // symbol's params already pin one.
        let mut params = strat_config.params.clone();
        if config.risk.cooldown_after_stop > 0 {
            params
                .entry("cooldown_bars".to_string())
                .or_insert(config.risk.cooldown_after_stop as f64);
        }

        let mut slots = Vec::new();
        for &tf in &timeframes {
            let mut strategy = strategies::build(&strat_config.strategy, &params)?;
            let frame = warmup_strategy(
                strategy.as_mut(),
                broker.as_ref(),
                symbol,
                tf,
                config.warmup_bars,
            )
            .await?;

            if frame.is_empty() {
                warn!(symbol = %symbol, timeframe = %format_timeframe(tf), "skipping timeframe, no historical data");
                continue;
            }
            slots.push(TimeframeSlot::new(tf, strategy, frame));
        }

        if slots.is_empty() {
            warn!(symbol = %symbol, "skipping symbol, no valid timeframes");
            report.log_error(format!("{symbol}: no historical data for warmup"));
            continue;
        }

        let mut engine = MultiTimeframeEngine::new(
            symbol.as_str(),
            slots,
            broker.clone(),
            risk.clone(),
            Some(db.clone()),
            report.clone(),
            sizing,
            strat_config.long_only,
        );

        // Initial reconcile recovers positions from a previous run.
        match engine.reconcile().await {
            Ok(recon) => info!(symbol = %symbol, outcome = %recon.outcome, "startup reconcile"),
            Err(e) => warn!(symbol = %symbol, error = %e, "startup reconcile failed"),
        }

        for &tf in &timeframes {
            feed.add_aggregator(symbol, tf);
        }

        report.log_status(format!(
            "Strategy loaded: {} on {symbol} ({})",
            strat_config.strategy,
            tf_labels.join(", ")
        ));
        handles.insert(symbol.to_string(), engine.spawn());
    }

    if handles.is_empty() {
        bail!("no engines created, check strategy config and market data");
    }

    // ── Feed wiring ─────────────────────────────────────────────────────
    feed.connect()?;
    feed.subscribe(handles.keys().cloned().collect());

    match broker.is_market_open().await {
        Ok(true) => info!("market is OPEN, streaming live bars"),
        Ok(false) => {
            info!("market is CLOSED, bot will stream bars when it opens");
            report.log_status("Market is closed. Waiting for open.");
        }
        Err(e) => warn!(error = %e, "market clock unavailable"),
    }

    let (bar_tx, mut bar_rx) = mpsc::channel::<FeedBar>(1024);
    let (stop_feed_tx, stop_feed_rx) = tokio::sync::oneshot::channel::<()>();

    // Feed task: runs the stream; on shutdown, flushes partial windows.
    let feed_task = tokio::spawn(async move {
        let flush_tx = bar_tx.clone();
        let finished = tokio::select! {
            result = feed.run(bar_tx) => Some(result),
            _ = stop_feed_rx => None,
        };
        match finished {
            Some(Err(e)) => error!(error = %e, "feed stopped with error"),
            Some(Ok(())) => info!("feed stopped"),
            None => {
                for feed_bar in feed.flush_all() {
                    let _ = flush_tx.send(feed_bar).await;
                }
                feed.disconnect();
            }
        }
    });

    // Router task: delivers aggregated bars into each symbol's mailbox.
    let router_handles = handles.clone();
    let router_task = tokio::spawn(async move {
        while let Some(feed_bar) = bar_rx.recv().await {
            if let Some(handle) = router_handles.get(&feed_bar.symbol) {
                handle.bar(feed_bar.timeframe, feed_bar.bar).await;
            }
        }
        info!("bar router stopped");
    });

    // Periodic reconcile task.
    let recon_handles: Vec<EngineHandle> = handles.values().cloned().collect();
    let recon_interval = config.reconcile_interval_secs.max(1);
    let reconcile_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(recon_interval));
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            for handle in &recon_handles {
                handle.reconcile().await;
            }
        }
    });

    info!(symbols = handles.len(), "bot running, press Ctrl+C to stop");

    // ── Await shutdown ──────────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");
    report.log_status("Bot stopping");

    // 1. Deactivate engines so nothing new opens during teardown.
    for handle in handles.values() {
        handle.pause().await;
    }

    // 2. Stop the feed (flushes partial windows) and the reconcile loop.
    let _ = stop_feed_tx.send(());
    reconcile_task.abort();

    // 3. Let in-flight bar handling quiesce.
    tokio::time::sleep(Duration::from_secs(1)).await;

    // 4. Cancel pending broker orders. Open positions are left to their own
    //    lifecycle.
    match broker.cancel_all(None).await {
        Ok(count) => info!(count, "pending orders cancelled"),
        Err(e) => warn!(error = %e, "could not cancel pending orders"),
    }

    // 5. Final account snapshot + daily P&L upsert.
    let end_account = match broker.get_account().await {
        Ok(account) => Some(account),
        Err(e) => {
            warn!(error = %e, "final account snapshot unavailable");
            None
        }
    };
    if let Some(end) = &end_account {
        report.set_account_end(end.clone());
    }

    let stats = risk.daily_stats();
    let record = DailyPnlRecord {
        date: stats.date.to_string(),
        realized_pnl: stats.daily_pnl,
        unrealized_pnl: None,
        trades_taken: stats.trades,
        wins: stats.wins,
        losses: stats.losses,
        equity_start: Some(account.equity),
        equity_end: end_account.as_ref().map(|a| a.equity),
        max_drawdown: None,
    };
    if let Err(e) = db.save_daily_pnl(&record) {
        error!(error = %e, "daily P&L persist failed");
    }

    // 6. Stop engine tasks, then close feed, broker, persistence in order.
    for handle in handles.values() {
        handle.shutdown().await;
    }
    let _ = feed_task.await;
    router_task.abort();
    broker.disconnect().await;

    report.log_status("Bot stopped");
    let report_path = report.save()?;
    info!(report = %report_path.display(), "daily report saved");

    Ok(())
}

// =============================================================================
// CLI commands
// =============================================================================

fn connect_broker(config: &BotConfig) -> Arc<dyn Broker> {
    Arc::new(AlpacaBroker::new(
        &config.api_key,
        &config.secret_key,
        config.paper_trading,
    ))
}

/// `meridian account` — show the account snapshot.
pub async fn show_account(config: &BotConfig) -> Result<()> {
    let broker = connect_broker(config);
    broker.connect().await?;
    let account = broker.get_account().await?;
    broker.disconnect().await;

    let mode = if config.paper_trading { "PAPER" } else { "LIVE" };
    print_banner(mode, &account, config);
    Ok(())
}

/// `meridian trades` — list recent trades from the log.
pub async fn show_trades(config: &BotConfig, today: bool, limit: usize) -> Result<()> {
    let db = Database::open(&config.db_path)?;
    let trades = if today {
        db.get_trades_since(chrono::Utc::now().date_naive(), limit)?
    } else {
        db.get_trade_history(limit)?
    };

    if trades.is_empty() {
        println!("\n  No trades recorded.\n");
        return Ok(());
    }

    println!("\n  {} trade(s):\n", trades.len());
    for trade in trades {
        let exit = match (trade.exit_price, trade.pnl) {
            (Some(price), Some(pnl)) => format!("exit ${price:.2} P&L ${pnl:+.2}"),
            _ => "open".to_string(),
        };
        println!(
            "  #{:<4} {} {:<5} {:>6.0} @ ${:<8.2} {}  {}",
            trade.id,
            &trade.entry_time[..16.min(trade.entry_time.len())],
            trade.ticker,
            trade.quantity,
            trade.entry_price,
            exit,
            trade.exit_reason.or(trade.signal_reason).unwrap_or_default(),
        );
    }
    println!();
    Ok(())
}

/// `meridian stats` — aggregate statistics over closed trades.
pub async fn show_stats(config: &BotConfig) -> Result<()> {
    let db = Database::open(&config.db_path)?;
    let stats = db.get_trade_stats()?;

    let win_rate = if stats.total_trades > 0 {
        stats.wins as f64 / stats.total_trades as f64 * 100.0
    } else {
        0.0
    };

    println!("\n  Trade statistics");
    println!("  ----------------");
    println!("  Closed trades: {:>10}", stats.total_trades);
    println!("  Wins/Losses:   {:>6} / {}", stats.wins, stats.losses);
    println!("  Win rate:      {win_rate:>9.1}%");
    println!("  Total P&L:     ${:>+10.2}", stats.total_pnl);
    println!("  Average P&L:   ${:>+10.2}", stats.avg_pnl);
    println!("  Best trade:    ${:>+10.2}", stats.best_trade);
    println!("  Worst trade:   ${:>+10.2}\n", stats.worst_trade);
    Ok(())
}

/// `meridian bars SYMBOL` — fetch and display recent bars.
pub async fn show_bars(
    config: &BotConfig,
    symbol: &str,
    timeframe_minutes: u32,
    limit: usize,
) -> Result<()> {
    let broker = connect_broker(config);
    broker.connect().await?;
    let bars = broker.get_bars(symbol, timeframe_minutes, limit).await?;
    broker.disconnect().await;

    println!(
        "\n  {symbol} — last {} bars ({})\n",
        bars.len(),
        format_timeframe(timeframe_minutes)
    );
    println!(
        "  {:<20} {:>10} {:>10} {:>10} {:>10} {:>12}",
        "time", "open", "high", "low", "close", "volume"
    );
    for bar in &bars {
        println!(
            "  {:<20} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>12.0}",
            bar.timestamp.format("%Y-%m-%d %H:%M"),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume
        );
    }
    println!();
    Ok(())
}

/// `meridian test-order` — paper-only order round trip: buy then flatten.
pub async fn test_order(config: &BotConfig, ticker: &str, qty: f64) -> Result<()> {
    if !config.paper_trading {
        bail!("test orders are only allowed in paper mode");
    }

    let broker = connect_broker(config);
    broker.connect().await?;

    let order = Order {
        timestamp: chrono::Utc::now(),
        symbol: ticker.to_string(),
        kind: SignalKind::OpenLong,
        quantity: qty,
        stop_loss: None,
        take_profit: None,
        reason: "test_order".to_string(),
    };

    println!("\n  Submitting test order: BUY {qty} {ticker}...");
    let trade = broker.submit_order(&order).await?;
    println!(
        "  Filled: {:.0} {} @ ${:.2}",
        trade.quantity, trade.symbol, trade.entry_price
    );

    println!("  Closing test position...");
    match broker.close_position(ticker).await? {
        Some(close) => println!("  Closed @ ${:.2}", close.entry_price),
        None => println!("  No position reported by broker."),
    }
    println!("  Test order flow complete.\n");

    broker.disconnect().await;
    Ok(())
}

// =============================================================================
// Banner
// =============================================================================

fn print_banner(mode: &str, account: &AccountSnapshot, config: &BotConfig) {
    let day_trade_status = if account.pattern_day_trader {
        format!("PDT — unlimited day trades ({}x margin)", account.multiplier)
    } else if account.equity >= 25_000.0 {
        format!(
            "above $25k — unlimited day trades ({}x margin)",
            account.multiplier
        )
    } else {
        let remaining = 3_u32.saturating_sub(account.daytrade_count);
        format!(
            "{remaining} day trades remaining (non-PDT, {}/3 used)",
            account.daytrade_count
        )
    };

    println!("\n{}", "=".repeat(60));
    println!("  Meridian Trading Bot — {mode} Mode");
    println!("{}", "=".repeat(60));
    println!("  Equity:           ${:>12.2}", account.equity);
    println!("  Cash:             ${:>12.2}", account.cash);
    println!("  Buying Power:     ${:>12.2}", account.buying_power);
    println!("  Reg-T BP:         ${:>12.2}", account.regt_buying_power);
    if account.daytrading_buying_power > 0.0 {
        println!("  Day Trade BP:     ${:>12.2}", account.daytrading_buying_power);
    }
    println!("  Day Trades:       {day_trade_status}");
    println!("  Status:           {}", account.status);
    println!("{}", "=".repeat(60));

    let enabled = config.enabled_strategies();
    if !enabled.is_empty() {
        println!("\n  Strategies ({}):", enabled.len());
        for (symbol, strat) in enabled {
            let mut flags = String::new();
            if strat.long_only {
                flags.push_str(" [LONG ONLY]");
            }
            if strat.timeframes.len() > 1 {
                flags.push_str(" [MULTI-TF]");
            }
            println!(
                "    {symbol}: {} ({}){flags}",
                strat.strategy,
                strat.timeframes.join(", ")
            );
        }
    }
    println!();
}
