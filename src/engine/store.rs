// =============================================================================
// CandleStore — per-symbol bounded, deduplicated, priority-merged store
// =============================================================================
//
// One SymbolBook per instrument: a ring of closed candles (ascending by
// bucket_time, at most one entry per bucket, capacity-bounded) plus at most
// one live (forming) candle whose bucket is never older than the closed tail.
//
// Locking: each book sits behind its own Mutex inside a shared RwLock'd map,
// so upserts and reads on one symbol are mutually exclusive while distinct
// symbols never contend. Readers take the same per-symbol lock and therefore
// always observe a fully consistent snapshot. The durable-sink write happens
// after the book lock is released.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::engine::bucket::Bucketizer;
use crate::engine::normalize::normalize_symbol;
use crate::engine::sanitize::sanitize_ohlc;
use crate::sink::CandleSink;
use crate::types::{Candle, IngestSummary, RawRecord};

// =============================================================================
// SymbolBook
// =============================================================================

struct SymbolBook {
    /// Closed candles, ascending by bucket_time, one per bucket.
    closed: VecDeque<Candle>,
    /// The forming candle, if any. Invariant: its bucket_time is >= the
    /// greatest closed bucket_time.
    live: Option<Candle>,
}

impl SymbolBook {
    fn new() -> Self {
        Self {
            closed: VecDeque::new(),
            live: None,
        }
    }
}

// =============================================================================
// CandleStore
// =============================================================================

pub struct CandleStore {
    books: RwLock<HashMap<String, Arc<Mutex<SymbolBook>>>>,
    /// Maximum closed candles retained per symbol; oldest evicted silently.
    capacity: usize,
    bucketizer: Bucketizer,
    sink: Arc<dyn CandleSink>,
}

impl CandleStore {
    pub fn new(capacity: usize, bucketizer: Bucketizer, sink: Arc<dyn CandleSink>) -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            capacity,
            bucketizer,
            sink,
        }
    }

    /// Fetch or create the book for a symbol. Fast path is a read lock.
    fn book(&self, symbol: &str) -> Arc<Mutex<SymbolBook>> {
        if let Some(book) = self.books.read().get(symbol) {
            return book.clone();
        }
        self.books
            .write()
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SymbolBook::new())))
            .clone()
    }

    /// Fetch an existing book without creating one (read path).
    fn peek_book(&self, symbol: &str) -> Option<Arc<Mutex<SymbolBook>>> {
        self.books.read().get(symbol).cloned()
    }

    // ── Ingestion pipeline ──────────────────────────────────────────────

    /// Consolidate a batch of feed records: normalize, bucketize, sanitize,
    /// route live vs closed, merge by source priority, write accepted closed
    /// candles through to the sink.
    ///
    /// Per-record data problems never fail the call; they are counted in the
    /// returned summary. The batch may mix symbols — each symbol's book is
    /// locked exactly once.
    pub fn ingest(&self, records: Vec<RawRecord>) -> IngestSummary {
        let now_ms = Utc::now().timestamp_millis();
        let mut summary = IngestSummary::default();
        let mut by_symbol: HashMap<String, Vec<Candle>> = HashMap::new();

        for rec in records {
            let symbol = normalize_symbol(&rec.symbol);

            // Only records lacking a pre-computed bucket are bucketized here.
            // Live records always describe the current bucket.
            let bucket_time = match rec.bucket_time {
                Some(t) => t,
                None if !rec.closed => self.bucketizer.bucket_now(rec.timeframe),
                None => match rec.timestamp.as_deref() {
                    Some(ts) => {
                        let (t, fell_back) =
                            self.bucketizer.parse_broker_local(ts, rec.timeframe);
                        if fell_back {
                            summary.clock_fallbacks += 1;
                        }
                        t
                    }
                    None => {
                        summary.clock_fallbacks += 1;
                        self.bucketizer.bucket_now(rec.timeframe)
                    }
                },
            };

            let Some(ohlc) = sanitize_ohlc(rec.open, rec.high, rec.low, rec.close, rec.volume)
            else {
                debug!(symbol = %symbol, "record dropped by sanitizer");
                summary.dropped += 1;
                continue;
            };

            by_symbol.entry(symbol.clone()).or_default().push(Candle {
                symbol,
                timeframe: rec.timeframe,
                bucket_time,
                open: ohlc.open,
                high: ohlc.high,
                low: ohlc.low,
                close: ohlc.close,
                volume: ohlc.volume,
                closed: rec.closed,
                source: rec.source,
                received_at: now_ms,
            });
        }

        for (symbol, candles) in by_symbol {
            summary.absorb(self.consolidate_symbol(&symbol, candles));
        }
        summary
    }

    /// Apply one symbol's candles under its exclusive lock: live-slot state
    /// machine first, then the closed-path merge.
    fn consolidate_symbol(&self, symbol: &str, candles: Vec<Candle>) -> IngestSummary {
        let book = self.book(symbol);
        let mut summary = IngestSummary::default();

        let accepted = {
            let mut guard = book.lock();
            let mut to_close: Vec<Candle> = Vec::new();

            for candle in candles {
                if candle.closed {
                    // A finalized bucket supersedes any live candle at or
                    // before it.
                    if guard
                        .live
                        .as_ref()
                        .is_some_and(|l| l.bucket_time <= candle.bucket_time)
                    {
                        guard.live = None;
                    }
                    to_close.push(candle);
                } else {
                    match guard.live.as_ref() {
                        // A newer bucket is forming: the old live candle will
                        // never be updated again, so promote it to closed.
                        Some(prev) if candle.bucket_time > prev.bucket_time => {
                            let mut finalized = prev.clone();
                            finalized.closed = true;
                            to_close.push(finalized);
                            guard.live = Some(candle);
                            summary.merged += 1;
                        }
                        // Same bucket: wholesale replacement with fresher data.
                        Some(prev) if candle.bucket_time == prev.bucket_time => {
                            guard.live = Some(candle);
                            summary.merged += 1;
                        }
                        // Older than the current live bucket: stale update.
                        Some(_) => {
                            summary.skipped += 1;
                        }
                        None => {
                            guard.live = Some(candle);
                            summary.merged += 1;
                        }
                    }
                }
            }

            let (merged, skipped, accepted) =
                Self::merge_locked(&mut guard, self.capacity, to_close);
            summary.merged += merged;
            summary.skipped += skipped;
            accepted
        };

        // Write-through outside the book lock; sink failures are its own
        // problem and never roll back memory state.
        for candle in &accepted {
            self.sink.write_closed(candle);
        }
        summary
    }

    // ── Closed-path merge engine ────────────────────────────────────────

    /// Upsert a batch of closed candles for one symbol as a single exclusive
    /// operation. Returns `(merged, skipped)`.
    pub fn upsert_closed(&self, symbol: &str, batch: Vec<Candle>) -> (u64, u64) {
        let book = self.book(symbol);
        let (merged, skipped, accepted) = {
            let mut guard = book.lock();
            Self::merge_locked(&mut guard, self.capacity, batch)
        };
        for candle in &accepted {
            self.sink.write_closed(candle);
        }
        (merged, skipped)
    }

    /// The merge proper. Incoming batch is sorted ascending, existing buckets
    /// are indexed, and each candle either replaces in place (when its source
    /// priority is >= the stored one), appends, or is skipped. The ring is
    /// re-sorted only when appends landed out of order, then truncated to the
    /// most recent `capacity` entries.
    fn merge_locked(
        book: &mut SymbolBook,
        capacity: usize,
        mut batch: Vec<Candle>,
    ) -> (u64, u64, Vec<Candle>) {
        if batch.is_empty() {
            return (0, 0, Vec::new());
        }
        batch.sort_by_key(|c| c.bucket_time);

        let mut index: HashMap<i64, usize> = book
            .closed
            .iter()
            .enumerate()
            .map(|(i, c)| (c.bucket_time, i))
            .collect();

        let mut merged = 0u64;
        let mut skipped = 0u64;
        let mut accepted = Vec::with_capacity(batch.len());
        let mut out_of_order = false;

        for candle in batch {
            match index.get(&candle.bucket_time) {
                Some(&i) => {
                    if candle.source.priority() >= book.closed[i].source.priority() {
                        book.closed[i] = candle.clone();
                        accepted.push(candle);
                        merged += 1;
                    } else {
                        skipped += 1;
                    }
                }
                None => {
                    if book
                        .closed
                        .back()
                        .is_some_and(|last| candle.bucket_time < last.bucket_time)
                    {
                        out_of_order = true;
                    }
                    index.insert(candle.bucket_time, book.closed.len());
                    book.closed.push_back(candle.clone());
                    accepted.push(candle);
                    merged += 1;
                }
            }
        }

        if out_of_order {
            book.closed.make_contiguous().sort_by_key(|c| c.bucket_time);
        }
        while book.closed.len() > capacity {
            book.closed.pop_front();
        }

        (merged, skipped, accepted)
    }

    // ── Query view ──────────────────────────────────────────────────────

    /// Assemble the consolidated closed+live view for one symbol, ascending
    /// by bucket_time: the last `limit` closed candles, with the live candle
    /// replacing an equal-bucket tail or appended after a newer one.
    ///
    /// A freshly computed snapshot; no side effects on the store.
    pub fn view(&self, symbol: &str, limit: usize) -> Vec<Candle> {
        let Some(book) = self.peek_book(symbol) else {
            return Vec::new();
        };
        let guard = book.lock();

        let start = guard.closed.len().saturating_sub(limit);
        let mut out: Vec<Candle> = guard.closed.iter().skip(start).cloned().collect();

        if let Some(live) = guard.live.clone() {
            match out.last().map(|c| c.bucket_time) {
                // The forming candle has the freshest data for its bucket.
                Some(t) if t == live.bucket_time => {
                    let i = out.len() - 1;
                    out[i] = live;
                }
                Some(t) if t < live.bucket_time => out.push(live),
                Some(_) => {}
                None => out.push(live),
            }
        }
        out
    }

    /// The current forming candle for a symbol, if any.
    pub fn live(&self, symbol: &str) -> Option<Candle> {
        self.peek_book(symbol).and_then(|b| b.lock().live.clone())
    }

    /// Number of closed candles currently stored for a symbol.
    pub fn closed_len(&self, symbol: &str) -> usize {
        self.peek_book(symbol).map_or(0, |b| b.lock().closed.len())
    }

    /// All symbols with at least one stored or forming candle, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.books.read().keys().cloned().collect();
        out.sort();
        out
    }
}

// =============================================================================
// Tests
// =============================================================================
