//! Trade frame normalizer
//!
//! Converts raw exchange frames into [`Tick`]s. Stateless.

use chrono::DateTime;
use tick_common::data::types::parse_decimal_str;
use tick_common::Tick;

use super::errors::{FeedError, NormalizeError};
use super::types::{StreamEnvelope, TradeMessage, TRADE_EVENT};

const MAX_SYMBOL_LEN: usize = 20;

/// Normalize one text frame.
///
/// Returns `Ok(None)` for well-formed frames that are not trades, such as
/// subscription confirmations or other event types.
pub fn normalize_frame(text: &str) -> Result<Option<Tick>, NormalizeError> {
    let value: serde_json::Value = serde_json::from_str(text)?;

    let payload = if value.get("stream").is_some() && value.get("data").is_some() {
        serde_json::from_value::<StreamEnvelope>(value)?.data
    } else {
        value
    };

    if !payload.is_object() {
        return Err(NormalizeError::Shape(format!(
            "expected an object, got {}",
            payload
        )));
    }

    if payload.get("e").and_then(|e| e.as_str()) != Some(TRADE_EVENT) {
        return Ok(None);
    }

    let msg: TradeMessage = serde_json::from_value(payload)?;
    normalize_trade(&msg).map(Some)
}

/// Normalize a decoded trade message
pub fn normalize_trade(msg: &TradeMessage) -> Result<Tick, NormalizeError> {
    let millis = msg
        .trade_time
        .or(msg.event_time)
        .ok_or(NormalizeError::MissingTimestamp)?;
    let timestamp = DateTime::from_timestamp_millis(millis)
        .ok_or(NormalizeError::TimestampOutOfRange(millis))?;

    let price = parse_positive("price", &msg.price)?;
    let size = parse_positive("size", &msg.quantity)?;

    if msg.symbol.trim().is_empty() {
        return Err(NormalizeError::InvalidValue {
            field: "symbol",
            value: msg.symbol.clone(),
        });
    }

    Ok(Tick::new(&msg.symbol, timestamp, price, size))
}

fn parse_positive(field: &'static str, raw: &str) -> Result<f64, NormalizeError> {
    let invalid = || NormalizeError::InvalidValue {
        field,
        value: raw.to_string(),
    };
    let value = parse_decimal_str(field, raw).map_err(|_| invalid())?;
    if value <= 0.0 {
        return Err(invalid());
    }
    Ok(value)
}

/// Validate a symbol and return its lowercase form.
pub fn validate_symbol(symbol: &str) -> Result<String, FeedError> {
    let symbol = symbol.trim().to_lowercase();
    if symbol.is_empty()
        || symbol.len() > MAX_SYMBOL_LEN
        || !symbol.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(FeedError::InvalidSymbol(symbol));
    }
    Ok(symbol)
}

/// Build the per-symbol trade stream URL, `<base>/<symbol>@trade`
pub fn trade_stream_url(base_url: &str, symbol: &str) -> Result<String, FeedError> {
    let symbol = validate_symbol(symbol)?;
    let url = format!("{}/{}@trade", base_url.trim_end_matches('/'), symbol);
    url::Url::parse(&url).map_err(|e| FeedError::Configuration(format!("{}: {}", url, e)))?;
    Ok(url)
}
