// =============================================================================
// Broker-Timezone-Aware Time Bucketing
// =============================================================================
//
// The broker push agent reports candle times in the broker's local zone with
// no zone marker, so bucket alignment has to happen in broker-local time and
// then be shifted back to UTC. The offset is a fixed signed minute count from
// config (brokers use fixed offsets like UTC+2/UTC+3, not DST-aware zones).
//
// A timestamp that cannot be parsed is a degraded-confidence ingestion, not a
// fatal error: the record is bucketed at the current wall-clock instant and
// the fallback is counted so operators can see it in /api/v1/info.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use crate::types::Timeframe;

/// Aligns instants to timeframe buckets under a fixed broker UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct Bucketizer {
    offset_minutes: i32,
}

impl Bucketizer {
    pub fn new(offset_minutes: i32) -> Self {
        Self { offset_minutes }
    }

    fn offset_seconds(&self) -> i64 {
        self.offset_minutes as i64 * 60
    }

    /// Floor a UTC epoch-second instant to its bucket start under the broker
    /// offset.
    ///
    /// The shift-floor-unshift is done on epoch seconds with a euclidean
    /// floor, so the returned `bucket_time` is an exact multiple of the
    /// timeframe width in broker-local time for every width including H4 and
    /// D1 (a plain minute-of-hour floor breaks down past one hour).
    pub fn floor_epoch(&self, utc_secs: i64, timeframe: Timeframe) -> i64 {
        let width = timeframe.seconds();
        let local = utc_secs + self.offset_seconds();
        local.div_euclid(width) * width - self.offset_seconds()
    }

    /// Floor a UTC instant to its bucket start under the broker offset.
    pub fn floor_to_bucket(&self, instant: DateTime<Utc>, timeframe: Timeframe) -> i64 {
        self.floor_epoch(instant.timestamp(), timeframe)
    }

    /// Bucket start for the current wall-clock instant.
    pub fn bucket_now(&self, timeframe: Timeframe) -> i64 {
        self.floor_to_bucket(Utc::now(), timeframe)
    }

    /// Parse a raw feed timestamp and floor it to its bucket start.
    ///
    /// Accepts RFC 3339 / ISO 8601 (zoned or zone-less, `T` or space
    /// separated) and the MT4/MT5 dotted-date form `YYYY.MM.DD HH:MM:SS`.
    /// Zone-less strings are interpreted as broker-local. Never fails: on any
    /// parse error the current instant is bucketed instead and the returned
    /// flag is `true` so the caller can count the fallback.
    pub fn parse_broker_local(&self, raw: &str, timeframe: Timeframe) -> (i64, bool) {
        match self.try_parse_utc_secs(raw) {
            Some(utc_secs) => (self.floor_epoch(utc_secs, timeframe), false),
            None => {
                warn!(raw = %raw, timeframe = %timeframe, "unparseable feed timestamp — bucketing at current time");
                (self.bucket_now(timeframe), true)
            }
        }
    }

    fn try_parse_utc_secs(&self, raw: &str) -> Option<i64> {
        let s = raw.trim();
        if s.len() < 10 || !s.is_char_boundary(10) {
            return None;
        }

        // MT4/MT5 dotted dates: rewrite only the date part so fractional
        // seconds survive.
        let (date, rest) = s.split_at(10);
        let mut s = format!("{}{}", date.replace('.', "-"), rest);
        if s.contains(' ') && !s.contains('T') {
            s = s.replacen(' ', "T", 1);
        }

        // Zoned forms carry their own offset and need no broker shift.
        if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
            return Some(dt.timestamp());
        }

        // Zone-less forms are broker-local.
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(&s, fmt) {
                return Some(naive.and_utc().timestamp() - self.offset_seconds());
            }
        }

        None
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, s).unwrap()
    }

    #[test]
    fn five_minute_buckets_under_plus_180_offset() {
        let b = Bucketizer::new(180);
        let expected = utc(10, 0, 0).timestamp();

        assert_eq!(b.floor_to_bucket(utc(10, 2, 0), Timeframe::M5), expected);
        assert_eq!(b.floor_to_bucket(utc(10, 4, 59), Timeframe::M5), expected);
        // The next boundary starts a new bucket.
        assert_eq!(
            b.floor_to_bucket(utc(10, 5, 0), Timeframe::M5),
            utc(10, 5, 0).timestamp()
        );
    }

    #[test]
    fn half_hour_offset_shifts_hourly_buckets() {
        // Broker at UTC+0:30 — hourly buckets start at :30 UTC.
        let b = Bucketizer::new(30);
        assert_eq!(
            b.floor_to_bucket(utc(10, 45, 0), Timeframe::H1),
            utc(10, 30, 0).timestamp()
        );
        assert_eq!(
            b.floor_to_bucket(utc(10, 15, 0), Timeframe::H1),
            utc(9, 30, 0).timestamp()
        );
    }

    #[test]
    fn negative_offset() {
        let b = Bucketizer::new(-300);
        let bucket = b.floor_to_bucket(utc(10, 2, 0), Timeframe::M15);
        // Aligned in broker-local time.
        assert_eq!((bucket + (-300_i64 * 60)).rem_euclid(900), 0);
        assert!(bucket <= utc(10, 2, 0).timestamp());
    }

    #[test]
    fn daily_buckets_align_in_broker_time() {
        let b = Bucketizer::new(120);
        let bucket = b.floor_to_bucket(utc(10, 2, 0), Timeframe::D1);
        assert_eq!((bucket + 120 * 60).rem_euclid(86_400), 0);
    }

    #[test]
    fn parses_mt5_dotted_timestamp_as_broker_local() {
        let b = Bucketizer::new(180);
        // 13:02 broker-local is 10:02 UTC, which floors to 10:00 UTC.
        let (bucket, fallback) = b.parse_broker_local("2024.01.15 13:02:07", Timeframe::M5);
        assert!(!fallback);
        assert_eq!(bucket, utc(10, 0, 0).timestamp());
    }

    #[test]
    fn parses_iso_space_and_t_forms() {
        let b = Bucketizer::new(0);
        let (a, fa) = b.parse_broker_local("2024-01-15 10:02:00", Timeframe::M5);
        let (t, ft) = b.parse_broker_local("2024-01-15T10:02:00", Timeframe::M5);
        assert!(!fa && !ft);
        assert_eq!(a, t);
        assert_eq!(a, utc(10, 0, 0).timestamp());
    }

    #[test]
    fn zoned_timestamp_ignores_broker_offset_for_conversion() {
        let b = Bucketizer::new(180);
        // Explicit zone wins over the broker offset, but flooring still
        // happens in broker-local time.
        let (bucket, fallback) =
            b.parse_broker_local("2024-01-15T10:02:00Z", Timeframe::M5);
        assert!(!fallback);
        assert_eq!(bucket, utc(10, 0, 0).timestamp());

        let (bucket2, _) = b.parse_broker_local("2024-01-15T13:02:00+03:00", Timeframe::M5);
        assert_eq!(bucket2, bucket);
    }

    #[test]
    fn garbage_falls_back_to_aligned_now() {
        let b = Bucketizer::new(180);
        for raw in ["not a time", "", "2024", "99.99.99 99:99:99"] {
            let (bucket, fallback) = b.parse_broker_local(raw, Timeframe::M5);
            assert!(fallback, "expected fallback for {raw:?}");
            // Still aligned under the offset.
            assert_eq!((bucket + 180 * 60).rem_euclid(300), 0);
        }
    }

    #[test]
    fn floor_is_idempotent() {
        let b = Bucketizer::new(180);
        let once = b.floor_to_bucket(utc(10, 2, 0), Timeframe::M5);
        assert_eq!(b.floor_epoch(once, Timeframe::M5), once);
    }
}
