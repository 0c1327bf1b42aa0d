// =============================================================================
// Tick normalisation — vendor JSON → canonical `Tick`
// =============================================================================
//
// Field aliases:
//   symbol     symbol | tradingsymbol | s
//   ltp        last_price | ltp
//   bid/ask    bid, ask, bid_qty, ask_qty  or  depth.buy[0] / depth.sell[0]
//   volume     volume | volume_traded
//   oi         oi | open_interest
//   prev close close | ohlc.close   (change / change_pct, only when > 0)
//
// Numbers may arrive as JSON numbers or numeric strings; absent or
// unparseable numeric fields default to zero.  A bad exchange timestamp
// leaves the field unset instead of failing the tick.
// =============================================================================

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use super::NormalizeError;
use crate::types::Tick;

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Split one inbound vendor message into per-tick payloads.
///
/// Accepts a single tick object, an array of ticks, or an envelope
/// `{"type": "ticks", "data": [...]}`.  Anything else yields nothing.
pub fn unroll(message: Value) -> Vec<Value> {
    match message {
        Value::Array(items) => items,
        Value::Object(mut obj) => {
            if obj.get("type").and_then(Value::as_str) == Some("ticks") {
                match obj.remove("data") {
                    Some(Value::Array(items)) => items,
                    Some(single @ Value::Object(_)) => vec![single],
                    _ => Vec::new(),
                }
            } else {
                vec![Value::Object(obj)]
            }
        }
        _ => Vec::new(),
    }
}

/// Normalise one vendor tick payload.  `received_at` stands in for the event
/// time when the payload carries no parseable `timestamp`.
pub fn normalize_tick(raw: &Value, received_at: DateTime<Utc>) -> Result<Tick, NormalizeError> {
    let obj = raw.as_object().ok_or(NormalizeError::NotAnObject)?;

    let symbol = first(obj, &["symbol", "tradingsymbol", "s"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(NormalizeError::MissingSymbol)?
        .to_string();

    let ltp = number(first(obj, &["last_price", "ltp"]));
    let volume = number(first(obj, &["volume", "volume_traded"]));
    let oi = number(first(obj, &["oi", "open_interest"]));

    let (mut bid, mut bid_qty) = (number(obj.get("bid")), number(obj.get("bid_qty")));
    let (mut ask, mut ask_qty) = (number(obj.get("ask")), number(obj.get("ask_qty")));
    if let Some(depth) = obj.get("depth") {
        if bid == 0.0 {
            (bid, bid_qty) = best_level(depth, "buy").unwrap_or((bid, bid_qty));
        }
        if ask == 0.0 {
            (ask, ask_qty) = best_level(depth, "sell").unwrap_or((ask, ask_qty));
        }
    }

    let prev_close = obj
        .get("close")
        .or_else(|| obj.get("ohlc").and_then(|o| o.get("close")))
        .map(|v| number(Some(v)))
        .unwrap_or(0.0);
    let (change, change_pct) = if prev_close > 0.0 {
        let change = ltp - prev_close;
        (change, change / prev_close * 100.0)
    } else {
        (0.0, 0.0)
    };

    for (field, value) in [
        ("ltp", ltp),
        ("volume", volume),
        ("oi", oi),
        ("bid", bid),
        ("ask", ask),
    ] {
        if !value.is_finite() {
            return Err(NormalizeError::NonFinite { symbol, field });
        }
    }

    let timestamp = obj
        .get("timestamp")
        .and_then(parse_timestamp)
        .unwrap_or(received_at);
    let exchange_timestamp = first(obj, &["exchange_timestamp", "last_trade_time"]).and_then(parse_timestamp);

    Ok(Tick {
        symbol,
        ltp,
        bid,
        ask,
        bid_qty,
        ask_qty,
        volume,
        oi,
        timestamp,
        exchange_timestamp,
        change,
        change_pct,
    })
}

/// Parse RFC 3339, `%Y-%m-%d %H:%M:%S` (taken as UTC), or epoch seconds /
/// milliseconds given as a number or numeric string.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            s.parse::<i64>().ok().and_then(from_epoch)
        }
        Value::Number(n) => match n.as_i64() {
            Some(i) => from_epoch(i),
            None => n.as_f64().filter(|f| f.is_finite() && *f > 0.0).and_then(|f| {
                let millis = if f >= EPOCH_MILLIS_THRESHOLD as f64 { f } else { f * 1000.0 };
                DateTime::<Utc>::from_timestamp_millis(millis as i64)
            }),
        },
        _ => None,
    }
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value <= 0 {
        return None;
    }
    if value >= EPOCH_MILLIS_THRESHOLD {
        DateTime::<Utc>::from_timestamp_millis(value)
    } else {
        DateTime::<Utc>::from_timestamp(value, 0)
    }
}

fn first<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| obj.get(*name).filter(|v| !v.is_null()))
}

fn number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn best_level(depth: &Value, side: &str) -> Option<(f64, f64)> {
    let level = depth.get(side)?.as_array()?.first()?;
    Some((number(level.get("price")), number(level.get("quantity"))))
}
