// =============================================================================
// Alpaca REST Broker — paper and live equities trading
// =============================================================================
//
// Talks to the Alpaca trading and market-data REST APIs. Credentials travel
// as headers (APCA-API-KEY-ID / APCA-API-SECRET-KEY) and are never logged.
//
// Market orders are submitted and then polled for their fill for up to ~15
// seconds; anything that does not fill in that window surfaces as a
// rejection. Equities trade commission-free, and real slippage is baked into
// the fill price, so both fields are recorded as zero.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Broker, BrokerError, BrokerResult};
use crate::types::{AccountSnapshot, Bar, BrokerPosition, Direction, Order, Trade};

const PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";
const LIVE_BASE_URL: &str = "https://api.alpaca.markets";
const DATA_BASE_URL: &str = "https://data.alpaca.markets";

/// Fill polling: 30 attempts x 500 ms ~= 15 s before giving up.
const FILL_POLL_ATTEMPTS: u32 = 30;
const FILL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Minutes of regular trading per day, used to overshoot history fetches far
/// enough to cover closed hours and weekends.
const TRADING_MINUTES_PER_DAY: usize = 390;

pub struct AlpacaBroker {
    client: reqwest::Client,
    base_url: String,
    data_url: String,
    paper: bool,
    connected: AtomicBool,
}

impl AlpacaBroker {
    pub fn new(api_key: impl AsRef<str>, secret_key: impl AsRef<str>, paper: bool) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(api_key.as_ref()) {
            headers.insert("APCA-API-KEY-ID", val);
        }
        if let Ok(val) = HeaderValue::from_str(secret_key.as_ref()) {
            headers.insert("APCA-API-SECRET-KEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: if paper { PAPER_BASE_URL } else { LIVE_BASE_URL }.to_string(),
            data_url: DATA_BASE_URL.to_string(),
            paper,
            connected: AtomicBool::new(false),
        }
    }

    fn ensure_connected(&self) -> BrokerResult<()> {
        if self.connected.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }

    // -------------------------------------------------------------------------
    // HTTP helpers
    // -------------------------------------------------------------------------

    async fn get_json(&self, url: &str) -> BrokerResult<serde_json::Value> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BrokerError::Unavailable(format!("GET {url}: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BrokerError::BadResponse(format!("GET {url}: {e}")))?;

        if !status.is_success() {
            return Err(BrokerError::Unavailable(format!("GET {url} returned {status}: {body}")));
        }
        Ok(body)
    }

    /// Poll an order until it fills or reaches a terminal state.
    async fn wait_for_fill(&self, order_id: &str) -> BrokerResult<serde_json::Value> {
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);

        for _ in 0..FILL_POLL_ATTEMPTS {
            let order = self.get_json(&url).await?;
            match order["status"].as_str().unwrap_or("") {
                "filled" => return Ok(order),
                "canceled" | "expired" | "rejected" => {
                    return Err(BrokerError::OrderRejected(format!(
                        "order {order_id} was {}",
                        order["status"].as_str().unwrap_or("terminal")
                    )));
                }
                _ => tokio::time::sleep(FILL_POLL_INTERVAL).await,
            }
        }

        Err(BrokerError::OrderRejected(format!(
            "order {order_id} not filled after {:.0}s",
            FILL_POLL_ATTEMPTS as f64 * FILL_POLL_INTERVAL.as_secs_f64()
        )))
    }

    /// Turn a filled order payload into a [`Trade`].
    fn trade_from_fill(
        symbol: &str,
        direction: Direction,
        fallback_qty: f64,
        filled: &serde_json::Value,
    ) -> BrokerResult<Trade> {
        let fill_price = opt_str_f64(&filled["filled_avg_price"]).unwrap_or(0.0);
        let fill_qty = opt_str_f64(&filled["filled_qty"]).unwrap_or(fallback_qty);
        let fill_time = filled["filled_at"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        if fill_price <= 0.0 {
            return Err(BrokerError::BadResponse(format!(
                "filled order for {symbol} carries no fill price"
            )));
        }

        Ok(Trade::open(fill_time, symbol, direction, fill_qty, fill_price, 0.0))
    }
}

#[async_trait]
impl Broker for AlpacaBroker {
    async fn connect(&self) -> BrokerResult<()> {
        // Verify credentials by fetching the account.
        self.connected.store(true, Ordering::Relaxed);
        match self.get_account().await {
            Ok(account) => {
                let mode = if self.paper { "PAPER" } else { "LIVE" };
                info!(
                    mode,
                    equity = account.equity,
                    cash = account.cash,
                    buying_power = account.buying_power,
                    "connected to broker"
                );
                Ok(())
            }
            Err(e) => {
                self.connected.store(false, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
        info!("disconnected from broker");
    }

    async fn submit_order(&self, order: &Order) -> BrokerResult<Trade> {
        self.ensure_connected()?;

        // Close kinds route to the flatten capability.
        if order.kind.is_exit() {
            return match self.close_position(&order.symbol).await? {
                Some(trade) => Ok(trade),
                None => Err(BrokerError::OrderRejected(format!(
                    "no position to close for {}",
                    order.symbol
                ))),
            };
        }

        let direction = order
            .kind
            .entry_direction()
            .ok_or_else(|| BrokerError::OrderRejected(format!("unsupported kind: {}", order.kind)))?;
        let side = match direction {
            Direction::Long => "buy",
            Direction::Short => "sell",
        };

        let body = serde_json::json!({
            "symbol": order.symbol,
            "qty": format!("{}", order.quantity),
            "side": side,
            "type": "market",
            "time_in_force": "day",
            "client_order_id": Uuid::new_v4().to_string(),
        });

        debug!(symbol = %order.symbol, side, qty = order.quantity, "submitting market order");

        let url = format!("{}/v2/orders", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BrokerError::Unavailable(format!("POST {url}: {e}")))?;

        let status = resp.status();
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BrokerError::BadResponse(format!("POST {url}: {e}")))?;

        if !status.is_success() {
            // 4xx means the brokerage looked at the order and said no.
            let message = payload["message"].as_str().unwrap_or("order declined").to_string();
            return if status.is_client_error() {
                Err(BrokerError::OrderRejected(message))
            } else {
                Err(BrokerError::Unavailable(format!("POST {url} returned {status}: {message}")))
            };
        }

        let order_id = payload["id"]
            .as_str()
            .ok_or_else(|| BrokerError::BadResponse("order response missing id".to_string()))?;

        let filled = self.wait_for_fill(order_id).await?;
        let trade = Self::trade_from_fill(&order.symbol, direction, order.quantity, &filled)?;

        info!(
            symbol = %order.symbol,
            direction = %trade.direction,
            qty = trade.quantity,
            price = trade.entry_price,
            order_id,
            "order filled"
        );
        Ok(trade)
    }

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<bool> {
        self.ensure_connected()?;
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| BrokerError::Unavailable(format!("DELETE {url}: {e}")))?;
        Ok(resp.status().is_success())
    }

    async fn cancel_all(&self, symbol: Option<&str>) -> BrokerResult<usize> {
        self.ensure_connected()?;

        match symbol {
            Some(symbol) => {
                // Fetch open orders for the symbol and cancel each by id.
                let url = format!(
                    "{}/v2/orders?status=open&symbols={}",
                    self.base_url, symbol
                );
                let orders = self.get_json(&url).await?;
                let orders = orders.as_array().cloned().unwrap_or_default();
                let mut cancelled = 0;
                for order in &orders {
                    if let Some(id) = order["id"].as_str() {
                        if self.cancel_order(id).await.unwrap_or(false) {
                            cancelled += 1;
                        }
                    }
                }
                Ok(cancelled)
            }
            None => {
                let url = format!("{}/v2/orders", self.base_url);
                let resp = self
                    .client
                    .delete(&url)
                    .send()
                    .await
                    .map_err(|e| BrokerError::Unavailable(format!("DELETE {url}: {e}")))?;
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                Ok(body.as_array().map_or(0, Vec::len))
            }
        }
    }

    async fn close_position(&self, symbol: &str) -> BrokerResult<Option<Trade>> {
        self.ensure_connected()?;

        let url = format!("{}/v2/positions/{}", self.base_url, symbol);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| BrokerError::Unavailable(format!("DELETE {url}: {e}")))?;

        if resp.status() == StatusCode::NOT_FOUND {
            warn!(symbol, "no position to close");
            return Ok(None);
        }

        let status = resp.status();
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BrokerError::BadResponse(format!("DELETE {url}: {e}")))?;

        if !status.is_success() {
            return Err(BrokerError::Unavailable(format!(
                "DELETE {url} returned {status}: {payload}"
            )));
        }

        let order_id = payload["id"]
            .as_str()
            .ok_or_else(|| BrokerError::BadResponse("close response missing order id".to_string()))?;
        let filled = self.wait_for_fill(order_id).await?;

        // The closing order's side tells us which way the position pointed.
        let closed_direction = match filled["side"].as_str().unwrap_or("sell") {
            "sell" => Direction::Long,
            _ => Direction::Short,
        };

        let trade = Self::trade_from_fill(symbol, closed_direction, 0.0, &filled)?;
        info!(
            symbol,
            qty = trade.quantity,
            price = trade.entry_price,
            "position closed"
        );
        Ok(Some(trade))
    }

    async fn get_position(&self, symbol: &str) -> BrokerResult<Option<BrokerPosition>> {
        self.ensure_connected()?;

        let url = format!("{}/v2/positions/{}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BrokerError::Unavailable(format!("GET {url}: {e}")))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BrokerError::BadResponse(format!("GET {url}: {e}")))?;

        if !status.is_success() {
            return Err(BrokerError::Unavailable(format!("GET {url} returned {status}: {body}")));
        }

        parse_position(&body).map(Some)
    }

    async fn get_positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
        self.ensure_connected()?;

        let url = format!("{}/v2/positions", self.base_url);
        let body = self.get_json(&url).await?;
        let entries = body
            .as_array()
            .ok_or_else(|| BrokerError::BadResponse("positions response is not an array".to_string()))?;

        entries.iter().map(parse_position).collect()
    }

    async fn get_account(&self) -> BrokerResult<AccountSnapshot> {
        self.ensure_connected()?;
        let url = format!("{}/v2/account", self.base_url);
        let body = self.get_json(&url).await?;
        parse_account(&body)
    }

    async fn get_bars(
        &self,
        symbol: &str,
        timeframe_minutes: u32,
        limit: usize,
    ) -> BrokerResult<Vec<Bar>> {
        self.ensure_connected()?;

        // Overshoot the start date to cover closed hours, weekends, and
        // holidays between now and `limit` bars ago.
        let days_needed =
            ((limit * timeframe_minutes as usize) / TRADING_MINUTES_PER_DAY + 3).max(5);
        let end = Utc::now();
        let start = end - TimeDelta::days(days_needed as i64);

        let url = format!(
            "{}/v2/stocks/{}/bars?timeframe={}&start={}&end={}&limit={}&feed=iex&adjustment=raw",
            self.data_url,
            symbol,
            timeframe_label(timeframe_minutes),
            start.to_rfc3339(),
            end.to_rfc3339(),
            limit.max(1),
        );

        let body = self.get_json(&url).await?;
        let mut bars = parse_bars(&body)?;

        bars.sort_by_key(|b| b.timestamp);
        if bars.len() > limit {
            bars.drain(..bars.len() - limit);
        }

        debug!(symbol, timeframe_minutes, count = bars.len(), "bars fetched");
        Ok(bars)
    }

    async fn is_market_open(&self) -> BrokerResult<bool> {
        self.ensure_connected()?;
        let url = format!("{}/v2/clock", self.base_url);
        let body = self.get_json(&url).await?;
        Ok(body["is_open"].as_bool().unwrap_or(false))
    }

    fn is_paper(&self) -> bool {
        self.paper
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AlpacaBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaBroker")
            .field("base_url", &self.base_url)
            .field("paper", &self.paper)
            .field("connected", &self.is_connected())
            .finish()
    }
}

// =============================================================================
// Response parsing (pure, unit-tested)
// =============================================================================

/// The Alpaca trading API encodes most numbers as JSON strings.
fn opt_str_f64(val: &serde_json::Value) -> Option<f64> {
    match val {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn str_f64(val: &serde_json::Value, name: &str) -> BrokerResult<f64> {
    opt_str_f64(val)
        .ok_or_else(|| BrokerError::BadResponse(format!("field {name} is not a number: {val}")))
}

/// "5Min" / "1Hour" label for the data API.
fn timeframe_label(minutes: u32) -> String {
    if minutes % 60 == 0 && minutes >= 60 {
        format!("{}Hour", minutes / 60)
    } else {
        format!("{minutes}Min")
    }
}

fn parse_position(body: &serde_json::Value) -> BrokerResult<BrokerPosition> {
    let symbol = body["symbol"]
        .as_str()
        .ok_or_else(|| BrokerError::BadResponse("position missing symbol".to_string()))?
        .to_string();
    let raw_qty = str_f64(&body["qty"], "qty")?;

    Ok(BrokerPosition {
        symbol,
        qty: raw_qty.abs(),
        avg_price: str_f64(&body["avg_entry_price"], "avg_entry_price")?,
        side: if raw_qty >= 0.0 {
            Direction::Long
        } else {
            Direction::Short
        },
        unrealized_pnl: opt_str_f64(&body["unrealized_pl"]).unwrap_or(0.0),
        market_value: opt_str_f64(&body["market_value"]).unwrap_or(0.0).abs(),
        current_price: opt_str_f64(&body["current_price"]).unwrap_or(0.0),
    })
}

fn parse_account(body: &serde_json::Value) -> BrokerResult<AccountSnapshot> {
    let buying_power = str_f64(&body["buying_power"], "buying_power")?;
    let cash = str_f64(&body["cash"], "cash")?;

    Ok(AccountSnapshot {
        cash,
        equity: str_f64(&body["equity"], "equity")?,
        buying_power,
        regt_buying_power: opt_str_f64(&body["regt_buying_power"]).unwrap_or(buying_power),
        daytrading_buying_power: opt_str_f64(&body["daytrading_buying_power"]).unwrap_or(0.0),
        non_marginable_buying_power: opt_str_f64(&body["non_marginable_buying_power"])
            .unwrap_or(cash),
        last_equity: opt_str_f64(&body["last_equity"]).unwrap_or(0.0),
        daytrade_count: body["daytrade_count"].as_u64().unwrap_or(0) as u32,
        pattern_day_trader: body["pattern_day_trader"].as_bool().unwrap_or(false),
        multiplier: opt_str_f64(&body["multiplier"]).unwrap_or(1.0) as u32,
        trading_blocked: body["trading_blocked"].as_bool().unwrap_or(false),
        currency: body["currency"].as_str().unwrap_or("USD").to_string(),
        status: body["status"].as_str().unwrap_or("unknown").to_string(),
    })
}

fn parse_bars(body: &serde_json::Value) -> BrokerResult<Vec<Bar>> {
    let entries = match body["bars"].as_array() {
        Some(arr) => arr,
        None => return Ok(Vec::new()), // no data for the window
    };

    let mut bars = Vec::with_capacity(entries.len());
    for entry in entries {
        let ts_raw = entry["t"]
            .as_str()
            .ok_or_else(|| BrokerError::BadResponse("bar missing timestamp".to_string()))?;
        let timestamp = DateTime::parse_from_rfc3339(ts_raw)
            .map_err(|e| BrokerError::BadResponse(format!("bad bar timestamp {ts_raw}: {e}")))?
            .with_timezone(&Utc);

        bars.push(Bar {
            timestamp,
            open: str_f64(&entry["o"], "o")?,
            high: str_f64(&entry["h"], "h")?,
            low: str_f64(&entry["l"], "l")?,
            close: str_f64(&entry["c"], "c")?,
            volume: str_f64(&entry["v"], "v")?,
        });
    }

    Ok(bars)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_labels() {
        assert_eq!(timeframe_label(1), "1Min");
        assert_eq!(timeframe_label(5), "5Min");
        assert_eq!(timeframe_label(30), "30Min");
        assert_eq!(timeframe_label(60), "1Hour");
    }

    #[test]
    fn parse_account_string_numbers() {
        let body = serde_json::json!({
            "cash": "25000.50",
            "equity": "60000.00",
            "buying_power": "120000.00",
            "regt_buying_power": "120000.00",
            "daytrading_buying_power": "240000.00",
            "non_marginable_buying_power": "25000.50",
            "last_equity": "59000.00",
            "daytrade_count": 2,
            "pattern_day_trader": true,
            "multiplier": "2",
            "trading_blocked": false,
            "currency": "USD",
            "status": "ACTIVE"
        });
        let account = parse_account(&body).unwrap();
        assert_eq!(account.equity, 60_000.0);
        assert_eq!(account.regt_buying_power, 120_000.0);
        assert_eq!(account.daytrade_count, 2);
        assert!(account.pattern_day_trader);
        assert_eq!(account.multiplier, 2);
        assert_eq!(account.status, "ACTIVE");
    }

    #[test]
    fn parse_account_missing_optional_fields_falls_back() {
        let body = serde_json::json!({
            "cash": "1000",
            "equity": "1000",
            "buying_power": "2000"
        });
        let account = parse_account(&body).unwrap();
        assert_eq!(account.regt_buying_power, 2_000.0); // falls back to BP
        assert_eq!(account.non_marginable_buying_power, 1_000.0);
        assert!(!account.trading_blocked);
    }

    #[test]
    fn parse_position_long_and_short() {
        let long = serde_json::json!({
            "symbol": "MSTR",
            "qty": "10",
            "avg_entry_price": "200.5",
            "unrealized_pl": "55.0",
            "market_value": "2060.0",
            "current_price": "206.0"
        });
        let pos = parse_position(&long).unwrap();
        assert_eq!(pos.side, Direction::Long);
        assert_eq!(pos.qty, 10.0);
        assert_eq!(pos.avg_price, 200.5);

        let short = serde_json::json!({
            "symbol": "PLTR",
            "qty": "-25",
            "avg_entry_price": "30.0",
            "market_value": "-750.0"
        });
        let pos = parse_position(&short).unwrap();
        assert_eq!(pos.side, Direction::Short);
        assert_eq!(pos.qty, 25.0);
        assert_eq!(pos.market_value, 750.0);
    }

    #[test]
    fn parse_bars_ascending() {
        let body = serde_json::json!({
            "bars": [
                {"t": "2026-03-02T15:00:00Z", "o": 10.0, "h": 11.0, "l": 9.0, "c": 10.5, "v": 100},
                {"t": "2026-03-02T15:05:00Z", "o": 10.5, "h": 12.0, "l": 10.0, "c": 11.0, "v": 200}
            ],
            "symbol": "MSTR",
            "next_page_token": null
        });
        let bars = parse_bars(&body).unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].timestamp < bars[1].timestamp);
        assert_eq!(bars[1].close, 11.0);
    }

    #[test]
    fn parse_bars_empty_when_no_data() {
        let body = serde_json::json!({"symbol": "MSTR", "bars": null});
        assert!(parse_bars(&body).unwrap().is_empty());
    }

    #[test]
    fn trade_from_fill_maps_fields() {
        let filled = serde_json::json!({
            "filled_avg_price": "412.35",
            "filled_qty": "10",
            "filled_at": "2026-03-02T15:04:01.5Z",
            "side": "buy",
            "status": "filled"
        });
        let trade =
            AlpacaBroker::trade_from_fill("MSTR", Direction::Long, 10.0, &filled).unwrap();
        assert_eq!(trade.entry_price, 412.35);
        assert_eq!(trade.quantity, 10.0);
        assert_eq!(trade.direction, Direction::Long);
        assert_eq!(trade.commission, 0.0);
    }

    #[test]
    fn trade_from_fill_rejects_zero_price() {
        let filled = serde_json::json!({"filled_qty": "10", "status": "filled"});
        assert!(AlpacaBroker::trade_from_fill("MSTR", Direction::Long, 10.0, &filled).is_err());
    }

    #[test]
    fn calls_require_connection() {
        let broker = AlpacaBroker::new("key", "secret", true);
        assert!(!broker.is_connected());
        assert!(matches!(
            broker.ensure_connected(),
            Err(BrokerError::NotConnected)
        ));
        assert!(broker.is_paper());
    }
}
