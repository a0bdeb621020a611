// exchange/types.rs
//
// Wire types for the exchange trade stream.

use serde::Deserialize;

/// Event type carried by trade frames
pub const TRADE_EVENT: &str = "trade";

/// Single-stream trade payload
#[derive(Debug, Deserialize, Clone)]
pub struct TradeMessage {
    /// Event type, "trade" for trades
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (ms since epoch)
    #[serde(rename = "E", default)]
    pub event_time: Option<i64>,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Price as a decimal string
    #[serde(rename = "p")]
    pub price: String,

    /// Quantity as a decimal string
    #[serde(rename = "q")]
    pub quantity: String,

    /// Trade time (ms since epoch)
    #[serde(rename = "T", default)]
    pub trade_time: Option<i64>,
}

/// Combined-stream wrapper: `{"stream": "btcusdt@trade", "data": {...}}`
#[derive(Debug, Deserialize)]
pub struct StreamEnvelope {
    #[allow(dead_code)]
    pub stream: String,
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_message_fields() {
        let json = r#"{"e":"trade","E":1672515782136,"s":"BTCUSDT","t":12345,
            "p":"50000.00","q":"0.001","T":1672515782130,"m":false,"M":true}"#;

        let msg: TradeMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.event_type, "trade");
        assert_eq!(msg.symbol, "BTCUSDT");
        assert_eq!(msg.price, "50000.00");
        assert_eq!(msg.quantity, "0.001");
        assert_eq!(msg.trade_time, Some(1672515782130));
        assert_eq!(msg.event_time, Some(1672515782136));
    }

    #[test]
    fn test_optional_times() {
        let json = r#"{"e":"trade","s":"ETHUSDT","p":"1","q":"2"}"#;
        let msg: TradeMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.trade_time, None);
        assert_eq!(msg.event_time, None);
    }
}
