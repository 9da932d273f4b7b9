// =============================================================================
// Market Data WebSocket Stream — real-time 1-minute bars
// =============================================================================
//
// Connects to the brokerage's market data stream, authenticates, subscribes
// to 1-minute bars for the configured symbols, and forwards parsed bars to
// the caller's channel.
//
// Runs until the stream disconnects or errors, then returns so the owner
// (MarketFeed::run) can handle reconnection with backoff.
// =============================================================================

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::types::Bar;

/// Build the stream URL for a data source ("iex" or "sip").
pub fn stream_url(source: &str) -> String {
    format!("wss://stream.data.alpaca.markets/v2/{source}")
}

/// Parse a bar-stream message. Messages arrive as JSON arrays; entries with
/// `"T": "b"` are 1-minute bars:
///
/// ```json
/// [{"T":"b","S":"MSTR","o":412.1,"h":413.0,"l":411.8,"c":412.6,"v":18231,
///   "t":"2026-03-02T15:04:00Z"}]
/// ```
///
/// Control entries (`success`, `subscription`, `error`) are skipped; an
/// `error` entry is logged.
pub fn parse_bar_message(text: &str) -> Result<Vec<(String, Bar)>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse stream JSON")?;

    let entries = match root.as_array() {
        Some(arr) => arr,
        None => return Ok(Vec::new()),
    };

    let mut bars = Vec::new();
    for entry in entries {
        match entry["T"].as_str() {
            Some("b") => {
                let symbol = entry["S"]
                    .as_str()
                    .context("bar message missing field S")?
                    .to_uppercase();
                let ts_raw = entry["t"].as_str().context("bar message missing field t")?;
                let timestamp = chrono::DateTime::parse_from_rfc3339(ts_raw)
                    .with_context(|| format!("bad bar timestamp: {ts_raw}"))?
                    .with_timezone(&chrono::Utc);

                let bar = Bar {
                    timestamp,
                    open: parse_f64(&entry["o"], "o")?,
                    high: parse_f64(&entry["h"], "h")?,
                    low: parse_f64(&entry["l"], "l")?,
                    close: parse_f64(&entry["c"], "c")?,
                    volume: parse_f64(&entry["v"], "v")?,
                };
                bars.push((symbol, bar));
            }
            Some("error") => {
                warn!(message = %entry, "stream error message");
            }
            _ => {} // success / subscription acks
        }
    }

    Ok(bars)
}

/// Field helper: bar payloads use plain JSON numbers.
fn parse_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    val.as_f64()
        .with_context(|| format!("field {name} is not a valid f64: {val}"))
}

/// Connect, authenticate, subscribe, and pump 1-minute bars into `tx` until
/// the stream ends or fails.
pub async fn run_bar_stream(
    url: &str,
    api_key: &str,
    secret_key: &str,
    symbols: &[String],
    tx: &mpsc::Sender<(String, Bar)>,
) -> Result<()> {
    info!(url = %url, symbols = ?symbols, "connecting to bar stream");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to bar stream")?;

    let (mut write, mut read) = ws_stream.split();

    // Authenticate, then subscribe to 1-minute bars.
    let auth = serde_json::json!({
        "action": "auth",
        "key": api_key,
        "secret": secret_key,
    });
    write
        .send(Message::Text(auth.to_string()))
        .await
        .context("failed to send auth message")?;

    let subscribe = serde_json::json!({
        "action": "subscribe",
        "bars": symbols,
    });
    write
        .send(Message::Text(subscribe.to_string()))
        .await
        .context("failed to send subscribe message")?;

    info!(count = symbols.len(), "bar stream subscribed");

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match parse_bar_message(&text) {
                Ok(bars) => {
                    for (symbol, bar) in bars {
                        debug!(symbol = %symbol, close = bar.close, ts = %bar.timestamp, "bar received");
                        if tx.send((symbol, bar)).await.is_err() {
                            // Receiver gone — the engine side is shutting down.
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to parse stream message");
                }
            },
            Some(Ok(_)) => {
                // Ping/Pong/Binary frames — tungstenite answers pings itself.
            }
            Some(Err(e)) => {
                warn!(error = %e, "bar stream read error");
                return Err(e.into());
            }
            None => {
                warn!("bar stream ended");
                return Ok(());
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bar_message_ok() {
        let json = r#"[{
            "T": "b", "S": "MSTR",
            "o": 412.10, "h": 413.00, "l": 411.80, "c": 412.60, "v": 18231,
            "t": "2026-03-02T15:04:00Z"
        }]"#;
        let bars = parse_bar_message(json).expect("should parse");
        assert_eq!(bars.len(), 1);
        let (symbol, bar) = &bars[0];
        assert_eq!(symbol, "MSTR");
        assert!((bar.close - 412.60).abs() < f64::EPSILON);
        assert!((bar.volume - 18231.0).abs() < f64::EPSILON);
        assert_eq!(
            bar.timestamp.to_rfc3339(),
            "2026-03-02T15:04:00+00:00"
        );
    }

    #[test]
    fn parse_skips_control_messages() {
        let json = r#"[
            {"T": "success", "msg": "authenticated"},
            {"T": "subscription", "bars": ["MSTR"]}
        ]"#;
        let bars = parse_bar_message(json).unwrap();
        assert!(bars.is_empty());
    }

    #[test]
    fn parse_mixed_batch() {
        let json = r#"[
            {"T": "subscription", "bars": ["MSTR", "PLTR"]},
            {"T": "b", "S": "MSTR", "o": 1.0, "h": 2.0, "l": 0.5, "c": 1.5, "v": 10,
             "t": "2026-03-02T15:04:00Z"},
            {"T": "b", "S": "PLTR", "o": 20.0, "h": 21.0, "l": 19.5, "c": 20.5, "v": 99,
             "t": "2026-03-02T15:04:00Z"}
        ]"#;
        let bars = parse_bar_message(json).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].0, "MSTR");
        assert_eq!(bars[1].0, "PLTR");
    }

    #[test]
    fn parse_rejects_malformed_bar() {
        let json = r#"[{"T": "b", "S": "MSTR", "o": "not-a-number",
            "h": 2.0, "l": 0.5, "c": 1.5, "v": 10, "t": "2026-03-02T15:04:00Z"}]"#;
        assert!(parse_bar_message(json).is_err());
    }

    #[test]
    fn parse_non_array_yields_nothing() {
        let bars = parse_bar_message(r#"{"T": "b"}"#).unwrap();
        assert!(bars.is_empty());
    }

    #[test]
    fn stream_url_by_source() {
        assert_eq!(
            stream_url("iex"),
            "wss://stream.data.alpaca.markets/v2/iex"
        );
        assert_eq!(
            stream_url("sip"),
            "wss://stream.data.alpaca.markets/v2/sip"
        );
    }
}
