// =============================================================================
// Wire Payloads — per-feed request shapes
// =============================================================================
//
// Each upstream feed has its own payload dialect; this module decodes them
// and maps everything onto the engine's common `RawRecord` shape. Numeric
// fields accept JSON numbers OR strings (broker agents are notorious for
// sending `"1.10000"`); an unparseable value decodes as absent and is then
// the sanitizer's problem, never a request failure.

use serde::Deserialize;

use crate::types::{RawRecord, Source, Timeframe};

// =============================================================================
// Flexible numeric decoding
// =============================================================================

/// Deserialize `Option<f64>` from a JSON number, a numeric string, or null.
/// Anything else decodes as `None`.
pub mod flexible_f64 {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
    }
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Broker push feed
// =============================================================================

/// Body of `POST /api/v1/broker/candles`. The push agent batches candles and
/// reports broker-local timestamp strings; buckets are computed server-side.
#[derive(Debug, Deserialize)]
pub struct BrokerPushPayload {
    #[serde(default)]
    pub candles: Vec<BrokerCandle>,
}

#[derive(Debug, Deserialize)]
pub struct BrokerCandle {
    pub symbol: String,
    pub timeframe: String,
    /// Raw broker-local timestamp, e.g. `2024.01.15 13:02:00`.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "flexible_f64::deserialize")]
    pub open: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64::deserialize")]
    pub high: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64::deserialize")]
    pub low: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64::deserialize")]
    pub close: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64::deserialize")]
    pub volume: Option<f64>,
    #[serde(default = "default_true")]
    pub closed: bool,
}

/// Map a broker push batch onto engine records. An invalid timeframe label is
/// a caller error and fails the whole request.
pub fn broker_records(payload: BrokerPushPayload) -> Result<Vec<RawRecord>, String> {
    payload
        .candles
        .into_iter()
        .map(|c| {
            let timeframe = Timeframe::parse(&c.timeframe)
                .ok_or_else(|| format!("invalid timeframe: {:?}", c.timeframe))?;
            Ok(RawRecord {
                symbol: c.symbol,
                timeframe,
                bucket_time: None,
                timestamp: c.timestamp,
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
                volume: c.volume,
                closed: c.closed,
                source: Source::BrokerPush,
            })
        })
        .collect()
}

// =============================================================================
// External relay feed
// =============================================================================

/// Body of `POST /api/v1/relay/candles`. The relay pre-computes bucket
/// boundaries (`from`/`to`) and uses `max`/`min` for the extremes.
#[derive(Debug, Deserialize)]
pub struct RelayPayload {
    pub symbol: String,
    pub timeframe: String,
    #[serde(default)]
    pub candles: Vec<RelayCandle>,
}

#[derive(Debug, Deserialize)]
pub struct RelayCandle {
    /// Bucket start, unix seconds UTC.
    pub from: i64,
    /// Bucket end; defaults to `from + timeframe`.
    #[serde(default)]
    pub to: Option<i64>,
    #[serde(default, deserialize_with = "flexible_f64::deserialize")]
    pub open: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64::deserialize", rename = "max")]
    pub high: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64::deserialize", rename = "min")]
    pub low: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64::deserialize")]
    pub close: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64::deserialize")]
    pub volume: Option<f64>,
    /// When absent, inferred: the bucket is closed once its window elapsed.
    #[serde(default)]
    pub closed: Option<bool>,
}

/// Map a relay batch onto engine records. `now_secs` drives the closed-bucket
/// inference for candles that omit the flag.
pub fn relay_records(payload: RelayPayload, now_secs: i64) -> Result<Vec<RawRecord>, String> {
    let timeframe = Timeframe::parse(&payload.timeframe)
        .ok_or_else(|| format!("invalid timeframe: {:?}", payload.timeframe))?;

    Ok(payload
        .candles
        .into_iter()
        .map(|c| {
            let to = c.to.unwrap_or(c.from + timeframe.seconds());
            let closed = c.closed.unwrap_or(now_secs >= to);
            RawRecord {
                symbol: payload.symbol.clone(),
                timeframe,
                bucket_time: Some(c.from),
                timestamp: None,
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
                volume: c.volume,
                closed,
                source: Source::ExternalRelay,
            }
        })
        .collect())
}

// =============================================================================
// Historical import / market-data backfill feeds
// =============================================================================

/// Body of `POST /api/v1/import/candles` and `POST /api/v1/backfill/candles`.
/// Both supply exact, already-aligned bucket times and only finalized data.
#[derive(Debug, Deserialize)]
pub struct SeriesPayload {
    pub symbol: String,
    pub timeframe: String,
    #[serde(default)]
    pub candles: Vec<SeriesCandle>,
}

#[derive(Debug, Deserialize)]
pub struct SeriesCandle {
    /// Bucket start, unix seconds UTC.
    pub time: i64,
    #[serde(default, deserialize_with = "flexible_f64::deserialize")]
    pub open: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64::deserialize")]
    pub high: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64::deserialize")]
    pub low: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64::deserialize")]
    pub close: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64::deserialize")]
    pub volume: Option<f64>,
}

/// Map an import/backfill batch onto engine records, all closed, tagged with
/// the endpoint's source.
pub fn series_records(payload: SeriesPayload, source: Source) -> Result<Vec<RawRecord>, String> {
    let timeframe = Timeframe::parse(&payload.timeframe)
        .ok_or_else(|| format!("invalid timeframe: {:?}", payload.timeframe))?;

    Ok(payload
        .candles
        .into_iter()
        .map(|c| RawRecord {
            symbol: payload.symbol.clone(),
            timeframe,
            bucket_time: Some(c.time),
            timestamp: None,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
            closed: true,
            source,
        })
        .collect())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_payload_accepts_string_numbers() {
        let json = r#"{
            "candles": [{
                "symbol": "EURUSD",
                "timeframe": "M5",
                "timestamp": "2024.01.15 13:02:00",
                "open": "1.10000",
                "high": "1.12000",
                "low": "1.05000",
                "close": 1.09,
                "volume": "42"
            }]
        }"#;
        let payload: BrokerPushPayload = serde_json::from_str(json).unwrap();
        let records = broker_records(payload).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.open, Some(1.10));
        assert_eq!(r.close, Some(1.09));
        assert_eq!(r.volume, Some(42.0));
        assert!(r.closed);
        assert_eq!(r.source, Source::BrokerPush);
        assert!(r.bucket_time.is_none());
    }

    #[test]
    fn broker_payload_unparseable_number_decodes_as_absent() {
        let json = r#"{
            "candles": [{
                "symbol": "EURUSD",
                "timeframe": "M5",
                "open": "n/a",
                "close": 1.09
            }]
        }"#;
        let payload: BrokerPushPayload = serde_json::from_str(json).unwrap();
        let records = broker_records(payload).unwrap();
        assert_eq!(records[0].open, None);
        assert_eq!(records[0].close, Some(1.09));
    }

    #[test]
    fn broker_invalid_timeframe_is_a_caller_error() {
        let json = r#"{"candles":[{"symbol":"EURUSD","timeframe":"M7","close":1.0,"open":1.0}]}"#;
        let payload: BrokerPushPayload = serde_json::from_str(json).unwrap();
        assert!(broker_records(payload).is_err());
    }

    #[test]
    fn relay_infers_closed_from_bucket_end() {
        let json = r#"{
            "symbol": "EURUSD",
            "timeframe": "M5",
            "candles": [
                {"from": 300, "to": 600, "open": 1.0, "max": 1.2, "min": 0.9, "close": 1.1},
                {"from": 600, "open": 1.1, "max": 1.3, "min": 1.0, "close": 1.2}
            ]
        }"#;
        let payload: RelayPayload = serde_json::from_str(json).unwrap();
        // now = 700: first bucket [300,600) has elapsed, second [600,900) has not.
        let records = relay_records(payload, 700).unwrap();
        assert!(records[0].closed);
        assert!(!records[1].closed);
        assert_eq!(records[0].high, Some(1.2));
        assert_eq!(records[0].low, Some(0.9));
        assert_eq!(records[0].bucket_time, Some(300));
        assert_eq!(records[0].source, Source::ExternalRelay);
    }

    #[test]
    fn series_records_are_always_closed() {
        let json = r#"{
            "symbol": "EURUSD",
            "timeframe": "H1",
            "candles": [{"time": 3600, "open": 1.0, "high": 1.2, "low": 0.9, "close": 1.1, "volume": 5}]
        }"#;
        let payload: SeriesPayload = serde_json::from_str(json).unwrap();
        let records = series_records(payload, Source::HistoricalImport).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].closed);
        assert_eq!(records[0].bucket_time, Some(3600));
        assert_eq!(records[0].source, Source::HistoricalImport);
    }
}
