// =============================================================================
// Durable Candle Sink — write-through CSV persistence
// =============================================================================
//
// Every closed candle the merge engine accepts is written through to a
// per-(symbol, timeframe) CSV file for long-term storage. The in-memory store
// is the system of record for serving; the sink is append-only history.
// Sink failures are logged and never roll back memory state.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::types::Candle;

/// Destination for finalized candles. Invoked once per closed candle the
/// merge engine accepts; implementations must not block the caller for long
/// and must swallow their own failures.
pub trait CandleSink: Send + Sync {
    fn write_closed(&self, candle: &Candle);
}

// =============================================================================
// NullSink
// =============================================================================

/// Discards everything. Used when persistence is disabled in config.
pub struct NullSink;

impl CandleSink for NullSink {
    fn write_closed(&self, _candle: &Candle) {}
}

// =============================================================================
// CsvSink
// =============================================================================

const CSV_HEADER: &str = "timestamp,datetime,open,high,low,close,volume,symbol,timeframe,source";

/// Appends closed candles to `<dir>/<SYMBOL>_<TIMEFRAME>.csv`, writing the
/// header when the file is created.
pub struct CsvSink {
    dir: PathBuf,
    // File appends are serialized; symbol ingestion is already parallel
    // upstream and candle rows are tiny.
    write_lock: Mutex<()>,
}

impl CsvSink {
    /// Create the sink, ensuring the data directory exists.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create data dir {}", dir.display()))?;
        info!(dir = %dir.display(), "CSV sink ready");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// CSV file path for one candle series.
    pub fn path(&self, symbol: &str, timeframe: &str) -> PathBuf {
        self.dir.join(format!("{symbol}_{timeframe}.csv"))
    }

    fn append(&self, candle: &Candle) -> Result<()> {
        let path = self.path(&candle.symbol, &candle.timeframe.to_string());
        let _guard = self.write_lock.lock();

        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        if is_new {
            writeln!(file, "{CSV_HEADER}")?;
        }

        let datetime = Utc
            .timestamp_opt(candle.bucket_time, 0)
            .single()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();

        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{},{}",
            candle.bucket_time,
            datetime,
            candle.open,
            candle.high,
            candle.low,
            candle.close,
            candle.volume,
            candle.symbol,
            candle.timeframe,
            candle.source,
        )?;
        Ok(())
    }
}

impl CandleSink for CsvSink {
    fn write_closed(&self, candle: &Candle) {
        if let Err(e) = self.append(candle) {
            warn!(
                symbol = %candle.symbol,
                timeframe = %candle.timeframe,
                error = %e,
                "CSV sink write failed — in-memory state unaffected"
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Source, Timeframe};

    fn sample(symbol: &str, bucket_time: i64) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timeframe: Timeframe::M5,
            bucket_time,
            open: 1.10,
            high: 1.12,
            low: 1.05,
            close: 1.09,
            volume: 42.0,
            closed: true,
            source: Source::BrokerPush,
            received_at: 0,
        }
    }

    #[test]
    fn writes_header_once_and_appends_rows() {
        let dir = std::env::temp_dir().join(format!("candle-hub-sink-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let sink = CsvSink::new(&dir).unwrap();

        sink.write_closed(&sample("EURUSD", 300));
        sink.write_closed(&sample("EURUSD", 600));

        let content = std::fs::read_to_string(sink.path("EURUSD", "M5")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].starts_with("300,"));
        assert!(lines[2].starts_with("600,"));
        assert!(lines[1].contains("broker_push"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn separate_files_per_symbol_and_timeframe() {
        let dir = std::env::temp_dir().join(format!("candle-hub-sink2-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let sink = CsvSink::new(&dir).unwrap();

        sink.write_closed(&sample("EURUSD", 300));
        sink.write_closed(&sample("GBPUSD", 300));

        assert!(sink.path("EURUSD", "M5").exists());
        assert!(sink.path("GBPUSD", "M5").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
