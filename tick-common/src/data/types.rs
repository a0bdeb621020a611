use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =================================================================
// Core data type: one normalized trade, matches the ticks table
// =================================================================

/// A single normalized trade event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tick {
    /// Trading pair in lowercase, such as "btcusdt"
    pub symbol: String,

    /// Exchange trade time
    pub timestamp: DateTime<Utc>,

    /// Trade price
    pub price: f64,

    /// Trade quantity
    pub size: f64,
}

/// Flat string-keyed representation of a tick as stored in the log
pub type TickFields = BTreeMap<String, String>;

pub const FIELD_SYMBOL: &str = "symbol";
pub const FIELD_TIME: &str = "time";
pub const FIELD_PRICE: &str = "price";
pub const FIELD_SIZE: &str = "size";

impl Tick {
    /// Create a tick, lowercasing the symbol
    pub fn new(symbol: impl AsRef<str>, timestamp: DateTime<Utc>, price: f64, size: f64) -> Self {
        Self {
            symbol: symbol.as_ref().to_lowercase(),
            timestamp,
            price,
            size,
        }
    }

    /// Natural key used by storage for duplicate detection
    pub fn key(&self) -> (String, DateTime<Utc>) {
        (self.symbol.clone(), self.timestamp)
    }

    /// Log entry fields: `symbol`, `time` (RFC 3339), `price`, `size` (decimal strings)
    pub fn to_fields(&self) -> TickFields {
        let mut fields = TickFields::new();
        fields.insert(FIELD_SYMBOL.to_string(), self.symbol.clone());
        fields.insert(
            FIELD_TIME.to_string(),
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        fields.insert(FIELD_PRICE.to_string(), self.price.to_string());
        fields.insert(FIELD_SIZE.to_string(), self.size.to_string());
        fields
    }

    /// Rebuild a tick from log entry fields
    pub fn from_fields(fields: &TickFields) -> DataResult<Self> {
        let symbol = required(fields, FIELD_SYMBOL)?;
        let time = required(fields, FIELD_TIME)?;
        let price = required(fields, FIELD_PRICE)?;
        let size = required(fields, FIELD_SIZE)?;

        let timestamp = DateTime::parse_from_rfc3339(time)
            .map_err(|e| DataError::InvalidFormat(format!("time '{}': {}", time, e)))?
            .with_timezone(&Utc);
        let price = parse_decimal_str(FIELD_PRICE, price)?;
        let size = parse_decimal_str(FIELD_SIZE, size)?;

        Ok(Self::new(symbol, timestamp, price, size))
    }
}

fn required<'a>(fields: &'a TickFields, name: &'static str) -> DataResult<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(DataError::MissingField(name))
}

/// Parse a decimal string into a finite f64
pub fn parse_decimal_str(field: &'static str, raw: &str) -> DataResult<f64> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| DataError::InvalidFormat(format!("{} '{}' is not a number", field, raw)))?;
    if !value.is_finite() {
        return Err(DataError::InvalidFormat(format!(
            "{} '{}' is not finite",
            field, raw
        )));
    }
    Ok(value)
}

// =================================================================
// Log identifiers and entries
// =================================================================

/// Strictly increasing log entry identifier, rendered as `<millis>-<seq>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryId {
    pub millis: u64,
    pub seq: u64,
}

impl EntryId {
    pub const ZERO: EntryId = EntryId { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Smallest id strictly greater than `self` for a clock reading of `now_millis`
    pub fn successor(&self, now_millis: u64) -> Self {
        if now_millis > self.millis {
            Self::new(now_millis, 0)
        } else {
            Self::new(self.millis, self.seq + 1)
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DataError::InvalidFormat(format!("entry id '{}'", s));
        let (millis, seq) = match s.split_once('-') {
            Some((millis, seq)) => (millis, seq),
            None => (s, "0"),
        };
        Ok(Self {
            millis: millis.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

/// One record of an append-only log
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: EntryId,
    pub fields: TickFields,
}

impl LogEntry {
    pub fn new(id: EntryId, fields: TickFields) -> Self {
        Self { id, fields }
    }

    /// Decode the tick carried by this entry
    pub fn tick(&self) -> DataResult<Tick> {
        Tick::from_fields(&self.fields)
    }
}

// =================================================================
// Errors
// =================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),
}

pub type DataResult<T> = Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_tick() -> Tick {
        Tick::new(
            "BTCUSDT",
            Utc.timestamp_millis_opt(1_672_531_382_136).unwrap(),
            50001.5,
            0.01,
        )
    }

    #[test]
    fn test_new_lowercases_symbol() {
        assert_eq!(sample_tick().symbol, "btcusdt");
    }

    #[test]
    fn test_fields_layout() {
        let fields = sample_tick().to_fields();

        assert_eq!(fields.len(), 4);
        assert_eq!(fields["symbol"], "btcusdt");
        assert_eq!(fields["time"], "2023-01-01T00:03:02.136Z");
        assert_eq!(fields["price"], "50001.5");
        assert_eq!(fields["size"], "0.01");
    }

    #[test]
    fn test_from_fields_restores_tick() {
        let tick = sample_tick();
        let restored = Tick::from_fields(&tick.to_fields()).unwrap();
        assert_eq!(restored, tick);
    }

    #[test]
    fn test_from_fields_rejects_missing_and_bad_values() {
        let mut fields = sample_tick().to_fields();
        fields.remove("size");
        assert_eq!(
            Tick::from_fields(&fields),
            Err(DataError::MissingField("size"))
        );

        let mut fields = sample_tick().to_fields();
        fields.insert("price".to_string(), "abc".to_string());
        assert!(matches!(
            Tick::from_fields(&fields),
            Err(DataError::InvalidFormat(_))
        ));

        let mut fields = sample_tick().to_fields();
        fields.insert("price".to_string(), "inf".to_string());
        assert!(Tick::from_fields(&fields).is_err());
    }

    #[test]
    fn test_entry_id_ordering_and_parsing() {
        let a: EntryId = "1672515782136-0".parse().unwrap();
        let b: EntryId = "1672515782136-1".parse().unwrap();
        let c: EntryId = "1672515782137-0".parse().unwrap();

        assert!(a < b && b < c);
        assert_eq!(b.to_string(), "1672515782136-1");
        assert_eq!("42".parse::<EntryId>().unwrap(), EntryId::new(42, 0));
        assert!("x-1".parse::<EntryId>().is_err());
    }

    #[test]
    fn test_entry_id_successor_is_strictly_increasing() {
        let id = EntryId::new(100, 3);
        assert_eq!(id.successor(100), EntryId::new(100, 4));
        // Clock went backwards: keep the millis, bump the sequence
        assert_eq!(id.successor(50), EntryId::new(100, 4));
        assert_eq!(id.successor(101), EntryId::new(101, 0));
    }
}
