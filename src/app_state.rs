// =============================================================================
// Central Application State — Candle Hub
// =============================================================================
//
// The single source of truth for the server. Constructed once at startup and
// passed to the API layer as `Arc<AppState>` — no module-level singletons.
//
// Thread safety:
//   - Atomic counters for lock-free ingestion stats.
//   - parking_lot::RwLock for the config.
//   - The candle store manages its own per-symbol locking.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use serde::Serialize;

use crate::engine::{Bucketizer, CandleStore};
use crate::runtime_config::RuntimeConfig;
use crate::sink::{CandleSink, CsvSink, NullSink};
use crate::types::IngestSummary;

/// Lifetime ingestion counters, exposed via `GET /api/v1/info`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub total_merged: u64,
    pub total_skipped: u64,
    pub total_dropped: u64,
    pub total_clock_fallbacks: u64,
    pub uptime_seconds: u64,
}

/// Central application state shared across all request handlers.
pub struct AppState {
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub store: Arc<CandleStore>,

    // ── Ingestion stats ─────────────────────────────────────────────────
    total_merged: AtomicU64,
    total_skipped: AtomicU64,
    total_dropped: AtomicU64,
    total_clock_fallbacks: AtomicU64,

    start_time: std::time::Instant,
}

impl AppState {
    /// Construct state from config: build the bucketizer from the broker
    /// offset, the CSV sink (or a null sink when disabled), and the store.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let bucketizer = Bucketizer::new(config.broker_tz_offset_minutes);

        let sink: Arc<dyn CandleSink> = if config.enable_csv_sink {
            Arc::new(CsvSink::new(&config.data_dir)?)
        } else {
            Arc::new(NullSink)
        };

        let store = Arc::new(CandleStore::new(
            config.max_buffer_candles,
            bucketizer,
            sink,
        ));

        Ok(Self {
            runtime_config: Arc::new(RwLock::new(config)),
            store,
            total_merged: AtomicU64::new(0),
            total_skipped: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            total_clock_fallbacks: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
        })
    }

    /// Fold one batch outcome into the lifetime counters.
    pub fn record_summary(&self, summary: &IngestSummary) {
        self.total_merged.fetch_add(summary.merged, Ordering::Relaxed);
        self.total_skipped.fetch_add(summary.skipped, Ordering::Relaxed);
        self.total_dropped.fetch_add(summary.dropped, Ordering::Relaxed);
        self.total_clock_fallbacks
            .fetch_add(summary.clock_fallbacks, Ordering::Relaxed);
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_merged: self.total_merged.load(Ordering::Relaxed),
            total_skipped: self.total_skipped.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            total_clock_fallbacks: self.total_clock_fallbacks.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> AppState {
        let mut config = RuntimeConfig::default();
        config.enable_csv_sink = false;
        AppState::new(config).unwrap()
    }

    #[test]
    fn counters_accumulate_across_batches() {
        let state = test_state();
        state.record_summary(&IngestSummary {
            merged: 3,
            skipped: 1,
            dropped: 2,
            clock_fallbacks: 1,
        });
        state.record_summary(&IngestSummary {
            merged: 2,
            skipped: 0,
            dropped: 0,
            clock_fallbacks: 0,
        });

        let stats = state.stats();
        assert_eq!(stats.total_merged, 5);
        assert_eq!(stats.total_skipped, 1);
        assert_eq!(stats.total_dropped, 2);
        assert_eq!(stats.total_clock_fallbacks, 1);
    }

    #[test]
    fn store_capacity_comes_from_config() {
        let state = test_state();
        assert_eq!(state.runtime_config.read().max_buffer_candles, 2000);
        assert!(state.store.symbols().is_empty());
    }
}
