// =============================================================================
// Feeds Module — real-time bars, aggregated per (symbol, timeframe)
// =============================================================================
//
// `MarketFeed` owns the WebSocket stream and one aggregator per registered
// timeframe. Incoming 1-minute bars fan out through every aggregator a symbol
// is registered on; completed N-minute bars are delivered tagged with their
// timeframe. Reconnection uses exponential backoff (3 s initial, doubling,
// capped at 60 s, up to 10 attempts by default).

pub mod aggregator;
pub mod stream;

use std::collections::HashMap;

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::FeedConfig;
use crate::types::Bar;
use self::aggregator::BarAggregator;

/// An aggregated bar delivered to the engine router.
#[derive(Debug, Clone)]
pub struct FeedBar {
    pub symbol: String,
    pub timeframe: u32,
    pub bar: Bar,
}

/// Real-time bar feed with per-(symbol, timeframe) aggregation.
pub struct MarketFeed {
    api_key: String,
    secret_key: String,
    config: FeedConfig,
    /// One aggregator per distinct timeframe; each keeps per-symbol buffers.
    aggregators: Vec<BarAggregator>,
    /// symbol -> timeframes the symbol is registered on.
    registrations: HashMap<String, Vec<u32>>,
    symbols: Vec<String>,
    connected: bool,
}

impl MarketFeed {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>, config: FeedConfig) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            config,
            aggregators: Vec::new(),
            registrations: HashMap::new(),
            symbols: Vec::new(),
            connected: false,
        }
    }

    /// Validate configuration; the socket itself is opened inside [`run`].
    pub fn connect(&mut self) -> Result<()> {
        if self.api_key.is_empty() || self.secret_key.is_empty() {
            bail!("feed credentials not set");
        }
        self.connected = true;
        info!(source = %self.config.source, "market feed initialised");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
        info!("market feed disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Register an aggregation target for `symbol` at `timeframe_minutes`.
    pub fn add_aggregator(&mut self, symbol: &str, timeframe_minutes: u32) {
        let tfs = self.registrations.entry(symbol.to_string()).or_default();
        if !tfs.contains(&timeframe_minutes) {
            tfs.push(timeframe_minutes);
        }
        if !self
            .aggregators
            .iter()
            .any(|a| a.timeframe_minutes() == timeframe_minutes)
        {
            self.aggregators.push(BarAggregator::new(timeframe_minutes));
        }
        info!(symbol, timeframe_minutes, "aggregator registered");
    }

    /// Record the symbols to subscribe to on (re)connection.
    pub fn subscribe(&mut self, symbols: Vec<String>) {
        info!(symbols = ?symbols, "feed subscription set");
        self.symbols = symbols;
    }

    /// Route one 1-minute bar through the symbol's aggregators.
    fn route_minute_bar(&mut self, symbol: &str, bar: Bar) -> Vec<FeedBar> {
        let Some(timeframes) = self.registrations.get(symbol).cloned() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for agg in &mut self.aggregators {
            let tf = agg.timeframe_minutes();
            if !timeframes.contains(&tf) {
                continue;
            }
            for emitted in agg.on_minute_bar(symbol, bar) {
                out.push(FeedBar {
                    symbol: symbol.to_string(),
                    timeframe: tf,
                    bar: emitted,
                });
            }
        }
        out
    }

    /// Emit every partially-filled window (market close, shutdown).
    pub fn flush_all(&mut self) -> Vec<FeedBar> {
        let mut out = Vec::new();
        for agg in &mut self.aggregators {
            let tf = agg.timeframe_minutes();
            for (symbol, bar) in agg.flush(None) {
                out.push(FeedBar {
                    symbol,
                    timeframe: tf,
                    bar,
                });
            }
        }
        out
    }

    /// Run the stream until the receiver side closes or reconnection gives
    /// up. Aggregated bars go to `out`. Blocks; spawn as its own task.
    pub async fn run(&mut self, out: mpsc::Sender<FeedBar>) -> Result<()> {
        if !self.connected {
            bail!("call connect() before run()");
        }

        let url = stream::stream_url(&self.config.source);
        let api_key = self.api_key.clone();
        let secret_key = self.secret_key.clone();
        let mut attempt: u32 = 0;
        let mut delay = self.config.reconnect_initial_secs.max(1);

        loop {
            let (raw_tx, mut raw_rx) = mpsc::channel::<(String, Bar)>(256);
            let symbols = self.symbols.clone();

            let stream_fut =
                stream::run_bar_stream(&url, &api_key, &secret_key, &symbols, &raw_tx);
            tokio::pin!(stream_fut);

            // Pump bars into aggregators while the stream runs.
            let stream_result = loop {
                tokio::select! {
                    result = &mut stream_fut => break result,
                    maybe_bar = raw_rx.recv() => {
                        let Some((symbol, bar)) = maybe_bar else { continue };
                        for feed_bar in self.route_minute_bar(&symbol, bar) {
                            if out.send(feed_bar).await.is_err() {
                                info!("feed consumer closed, stopping stream");
                                return Ok(());
                            }
                        }
                    }
                }
            };

            // Drain any bars the stream produced right before ending.
            drop(stream_fut);
            while let Ok((symbol, bar)) = raw_rx.try_recv() {
                for feed_bar in self.route_minute_bar(&symbol, bar) {
                    if out.send(feed_bar).await.is_err() {
                        return Ok(());
                    }
                }
            }

            match stream_result {
                Ok(()) if out.is_closed() => return Ok(()),
                Ok(()) => {
                    warn!("bar stream closed cleanly, reconnecting");
                }
                Err(e) => {
                    warn!(error = %e, "bar stream failed");
                }
            }

            attempt += 1;
            if attempt >= self.config.reconnect_attempts {
                error!(
                    attempts = attempt,
                    "max feed reconnection attempts reached, giving up"
                );
                bail!("feed reconnection failed after {attempt} attempts");
            }

            warn!(
                attempt,
                delay_secs = delay,
                "reconnecting bar stream after backoff"
            );
            tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
            delay = (delay * 2).min(self.config.reconnect_max_secs);
        }
    }
}

impl std::fmt::Debug for MarketFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketFeed")
            .field("source", &self.config.source)
            .field("symbols", &self.symbols)
            .field("aggregators", &self.aggregators.len())
            .field("connected", &self.connected)
            .finish()
    }
}
