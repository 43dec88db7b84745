// =============================================================================
// Shared types used across the candle-hub consolidation server
// =============================================================================

use serde::{Deserialize, Serialize};

// =============================================================================
// Timeframe
// =============================================================================

/// Candle bucket width. Only these widths are valid; anything else on the
/// wire is a caller error (rejected with 400 at the API boundary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// Bucket width in minutes.
    pub fn minutes(self) -> u32 {
        match self {
            Self::M1 => 1,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::M30 => 30,
            Self::H1 => 60,
            Self::H4 => 240,
            Self::D1 => 1440,
        }
    }

    /// Bucket width in seconds.
    pub fn seconds(self) -> i64 {
        self.minutes() as i64 * 60
    }

    /// Parse a wire label. Accepts the canonical `M5` form as well as the
    /// bare minute count (`"5"`) that some feeds send.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "M1" | "1" => Some(Self::M1),
            "M5" | "5" => Some(Self::M5),
            "M15" | "15" => Some(Self::M15),
            "M30" | "30" => Some(Self::M30),
            "H1" | "60" => Some(Self::H1),
            "H4" | "240" => Some(Self::H4),
            "D1" | "1440" => Some(Self::D1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::M1 => "M1",
            Self::M5 => "M5",
            Self::M15 => "M15",
            Self::M30 => "M30",
            Self::H1 => "H1",
            Self::H4 => "H4",
            Self::D1 => "D1",
        };
        write!(f, "{label}")
    }
}

// =============================================================================
// Source
// =============================================================================

/// Which upstream feed contributed a candle. The fixed priority ranking is
/// used to resolve conflicting versions of the same time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    BrokerPush,
    HistoricalImport,
    MarketDataBackfill,
    ExternalRelay,
    Unknown,
}

impl Source {
    /// Fixed total order over feeds, highest wins.
    ///
    /// An incoming candle replaces a stored one at the same bucket iff
    /// `incoming.priority() >= stored.priority()` — ties favour the most
    /// recent arrival.
    pub fn priority(self) -> u8 {
        match self {
            Self::BrokerPush => 4,
            Self::HistoricalImport => 3,
            Self::MarketDataBackfill => 2,
            Self::ExternalRelay => 1,
            Self::Unknown => 0,
        }
    }
}

impl Default for Source {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::BrokerPush => "broker_push",
            Self::HistoricalImport => "historical_import",
            Self::MarketDataBackfill => "market_data_backfill",
            Self::ExternalRelay => "external_relay",
            Self::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

// =============================================================================
// Candle
// =============================================================================

/// A single finalized or forming OHLCV bucket.
///
/// Every stored candle satisfies `low <= min(open, close)` and
/// `max(open, close) <= high` (enforced by the sanitizer), and its
/// `bucket_time` is an exact multiple of the timeframe width under the
/// configured broker offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Bucket start, unix seconds UTC.
    pub bucket_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// True once the bucket's window has elapsed and no further updates are
    /// expected.
    pub closed: bool,
    pub source: Source,
    /// Ingestion instant, unix milliseconds. Informational only — never part
    /// of the candle's identity.
    pub received_at: i64,
}

// =============================================================================
// RawRecord
// =============================================================================

/// The common record shape every feed is mapped to before it reaches the
/// consolidation engine. Feeds differ only in which fields they pre-compute:
/// the historical importer supplies an exact `bucket_time`, the broker push
/// agent supplies a raw broker-local `timestamp` string instead.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Pre-computed, already-aligned bucket start (unix seconds UTC).
    pub bucket_time: Option<i64>,
    /// Raw timestamp string, interpreted as broker-local when zone-less.
    pub timestamp: Option<String>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub closed: bool,
    pub source: Source,
}

// =============================================================================
// IngestSummary
// =============================================================================

/// Per-batch outcome counters. Data-quality problems never surface as errors;
/// these counts are the caller-visible signal.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IngestSummary {
    /// Candles appended or accepted as replacements.
    pub merged: u64,
    /// Candles rejected by the source-priority rule (or stale live updates).
    pub skipped: u64,
    /// Records dropped by the sanitizer (unusable open/close).
    pub dropped: u64,
    /// Records whose timestamp could not be parsed and fell back to
    /// current-time bucketing.
    pub clock_fallbacks: u64,
}

impl IngestSummary {
    pub fn absorb(&mut self, other: IngestSummary) {
        self.merged += other.merged;
        self.skipped += other.skipped;
        self.dropped += other.dropped;
        self.clock_fallbacks += other.clock_fallbacks;
    }
}

// =============================================================================
// Tests
// =============================================================================
