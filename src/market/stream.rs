// =============================================================================
// Venue intake adapter — WebSocket streams to normalised events
// =============================================================================
//
// The only component that knows wire details. Connects to a combined stream
// endpoint, parses book-ticker / aggregated-trade / forced-liquidation
// messages, stamps each with the monotonic ingest time, a fresh event id,
// and the FNV-1a symbol hash, and routes it into the owning lane's queue.
//
// Parse failures are transient I/O: logged, counted, skipped. A dropped
// connection returns to the caller, which owns the reconnect/backoff loop.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};

use crate::clock::EngineClock;
use crate::lane::LaneMsg;
use crate::market::events::{
    fnv1a32, DepthUpdate, IntakeStats, Liquidation, MarketEvent, Tick, Trade,
};

/// Routing table: symbol hash → that symbol's lane queue.
pub type LaneRouter = HashMap<u32, mpsc::Sender<LaneMsg>>;

/// Build the combined-stream URL for a venue endpoint and symbol list.
pub fn combined_stream_url(base_url: &str, symbols: &[String]) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .flat_map(|s| {
            let lower = s.to_lowercase();
            [
                format!("{lower}@bookTicker"),
                format!("{lower}@aggTrade"),
                format!("{lower}@forceOrder"),
            ]
        })
        .collect();
    format!("{}/stream?streams={}", base_url, streams.join("/"))
}

/// Connect and pump events until the stream ends or errors.
pub async fn run_intake(
    venue_name: &str,
    url: &str,
    router: &LaneRouter,
    clock: &Arc<EngineClock>,
    stats: &Arc<IntakeStats>,
) -> Result<()> {
    info!(venue = venue_name, url, "connecting market data stream");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect market data WebSocket")?;
    info!(venue = venue_name, "market data stream connected");

    let (_write, mut read) = ws_stream.split();

    while let Some(message) = read.next().await {
        let message = message.context("market data stream read error")?;
        let tokio_tungstenite::tungstenite::Message::Text(text) = message else {
            continue;
        };

        match parse_stream_message(&text, clock) {
            Ok(Some(event)) => {
                let Some(tx) = router.get(&event.symbol_hash()) else {
                    // Not a configured symbol; quietly skip.
                    continue;
                };
                // Bounded queue: drop on overflow rather than stall intake.
                if tx.try_send(LaneMsg::Market(event)).is_err() {
                    warn!(venue = venue_name, "lane queue full, event dropped");
                }
            }
            Ok(None) => {}
            Err(e) => {
                stats.dropped_parse.fetch_add(1, Ordering::Relaxed);
                warn!(venue = venue_name, error = %e, "unparseable stream message");
            }
        }
    }

    warn!(venue = venue_name, "market data stream ended");
    Ok(())
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse one combined-stream message into a normalised event. Returns
/// `Ok(None)` for recognised but irrelevant frames (subscription acks etc).
pub fn parse_stream_message(
    text: &str,
    clock: &Arc<EngineClock>,
) -> Result<Option<MarketEvent>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("invalid stream JSON")?;

    // Combined streams wrap payloads as {"stream": ..., "data": ...}.
    let data = root.get("data").unwrap_or(&root);

    let Some(event_type) = data.get("e").and_then(|v| v.as_str()) else {
        return Ok(None);
    };

    let ts_ns = clock.now_ns();

    match event_type {
        "bookTicker" => Ok(Some(parse_book_ticker(data, clock, ts_ns)?)),
        "aggTrade" => Ok(Some(parse_agg_trade(data, clock, ts_ns)?)),
        "forceOrder" => Ok(Some(parse_force_order(data, clock, ts_ns)?)),
        "depthUpdate" => Ok(Some(parse_depth_update(data, clock, ts_ns)?)),
        _ => Ok(None),
    }
}

fn field_f64(data: &serde_json::Value, key: &str) -> Result<f64> {
    let value = data
        .get(key)
        .with_context(|| format!("missing field {key}"))?;
    if let Some(s) = value.as_str() {
        s.parse().with_context(|| format!("bad number in {key}"))
    } else {
        value
            .as_f64()
            .with_context(|| format!("bad number in {key}"))
    }
}

fn field_symbol(data: &serde_json::Value) -> Result<String> {
    Ok(data
        .get("s")
        .and_then(|v| v.as_str())
        .context("missing field s")?
        .to_uppercase())
}

fn parse_book_ticker(
    data: &serde_json::Value,
    clock: &Arc<EngineClock>,
    ts_ns: u64,
) -> Result<MarketEvent> {
    let symbol = field_symbol(data)?;
    let symbol_hash = fnv1a32(&symbol);
    Ok(MarketEvent::Tick(Tick {
        event_id: clock.next_event_id(),
        symbol,
        symbol_hash,
        bid: field_f64(data, "b")?,
        ask: field_f64(data, "a")?,
        bid_size: field_f64(data, "B")?,
        ask_size: field_f64(data, "A")?,
        ts_ns,
    }))
}

fn parse_agg_trade(
    data: &serde_json::Value,
    clock: &Arc<EngineClock>,
    ts_ns: u64,
) -> Result<MarketEvent> {
    let symbol = field_symbol(data)?;
    let symbol_hash = fnv1a32(&symbol);
    let is_buyer_maker = data
        .get("m")
        .and_then(|v| v.as_bool())
        .context("missing field m")?;
    Ok(MarketEvent::Trade(Trade {
        event_id: clock.next_event_id(),
        symbol,
        symbol_hash,
        price: field_f64(data, "p")?,
        qty: field_f64(data, "q")?,
        // Buyer-is-maker means the aggressor sold.
        is_buy: !is_buyer_maker,
        ts_ns,
    }))
}

fn parse_force_order(
    data: &serde_json::Value,
    clock: &Arc<EngineClock>,
    ts_ns: u64,
) -> Result<MarketEvent> {
    let order = data.get("o").context("missing field o")?;
    let symbol = field_symbol(order)?;
    let symbol_hash = fnv1a32(&symbol);
    let price = field_f64(order, "p")?;
    let qty = field_f64(order, "q")?;
    let side = order
        .get("S")
        .and_then(|v| v.as_str())
        .context("missing field S")?;
    Ok(MarketEvent::Liquidation(Liquidation {
        event_id: clock.next_event_id(),
        symbol,
        symbol_hash,
        price,
        qty,
        notional: price * qty,
        // A forced SELL closes a long position.
        is_long: side.eq_ignore_ascii_case("SELL"),
        ts_ns,
    }))
}

fn parse_depth_update(
    data: &serde_json::Value,
    clock: &Arc<EngineClock>,
    ts_ns: u64,
) -> Result<MarketEvent> {
    let symbol = field_symbol(data)?;
    let symbol_hash = fnv1a32(&symbol);

    let sum_side = |key: &str| -> f64 {
        data.get(key)
            .and_then(|v| v.as_array())
            .map(|levels| {
                levels
                    .iter()
                    .filter_map(|level| {
                        let qty = level.get(1)?.as_str()?.parse::<f64>().ok()?;
                        Some(qty)
                    })
                    .sum()
            })
            .unwrap_or(0.0)
    };

    Ok(MarketEvent::Depth(DepthUpdate {
        event_id: clock.next_event_id(),
        symbol,
        symbol_hash,
        bid_depth: sum_side("b"),
        ask_depth: sum_side("a"),
        ts_ns,
    }))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> Arc<EngineClock> {
        Arc::new(EngineClock::wall())
    }

    #[test]
    fn url_builds_all_three_streams() {
        let url = combined_stream_url(
            "wss://stream.example.com:9443",
            &["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        );
        assert!(url.contains("btcusdt@bookTicker"));
        assert!(url.contains("btcusdt@aggTrade"));
        assert!(url.contains("ethusdt@forceOrder"));
    }

    #[test]
    fn parses_book_ticker() {
        let msg = r#"{"stream":"btcusdt@bookTicker","data":{"e":"bookTicker","s":"BTCUSDT","b":"64000.50","B":"2.5","a":"64000.60","A":"1.5"}}"#;
        let event = parse_stream_message(msg, &clock()).unwrap().unwrap();
        let MarketEvent::Tick(tick) = event else {
            panic!("expected tick");
        };
        assert_eq!(tick.symbol, "BTCUSDT");
        assert_eq!(tick.symbol_hash, fnv1a32("BTCUSDT"));
        assert!((tick.bid - 64000.50).abs() < 1e-9);
        assert!((tick.ask_size - 1.5).abs() < 1e-9);
    }

    #[test]
    fn parses_agg_trade_aggressor_side() {
        let msg = r#"{"e":"aggTrade","s":"ETHUSDT","p":"3200.10","q":"0.75","m":true}"#;
        let event = parse_stream_message(msg, &clock()).unwrap().unwrap();
        let MarketEvent::Trade(trade) = event else {
            panic!("expected trade");
        };
        // Buyer was maker => the taker sold.
        assert!(!trade.is_buy);
        assert!((trade.qty - 0.75).abs() < 1e-9);
    }

    #[test]
    fn parses_force_order_direction() {
        let msg = r#"{"e":"forceOrder","o":{"s":"BTCUSDT","S":"SELL","p":"63000.0","q":"80.0"}}"#;
        let event = parse_stream_message(msg, &clock()).unwrap().unwrap();
        let MarketEvent::Liquidation(liq) = event else {
            panic!("expected liquidation");
        };
        assert!(liq.is_long);
        assert!((liq.notional - 63_000.0 * 80.0).abs() < 1e-6);
    }

    #[test]
    fn parses_depth_update_sums() {
        let msg = r#"{"e":"depthUpdate","s":"BTCUSDT","b":[["64000.1","2.0"],["64000.0","3.0"]],"a":[["64000.2","1.5"]]}"#;
        let event = parse_stream_message(msg, &clock()).unwrap().unwrap();
        let MarketEvent::Depth(depth) = event else {
            panic!("expected depth");
        };
        assert!((depth.bid_depth - 5.0).abs() < 1e-9);
        assert!((depth.ask_depth - 1.5).abs() < 1e-9);
    }

    #[test]
    fn unknown_frames_are_skipped_not_errors() {
        let msg = r#"{"result":null,"id":1}"#;
        assert!(parse_stream_message(msg, &clock()).unwrap().is_none());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_stream_message("not json", &clock()).is_err());
    }
}
