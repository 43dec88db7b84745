// =============================================================================
// OHLC Sanitization
// =============================================================================
//
// Feed payloads routinely arrive with missing highs/lows, swapped extremes or
// junk volume. Rather than rejecting those records outright, the sanitizer
// repairs whatever can be repaired and only gives up when open or close is
// unusable. The returned values always satisfy
// `low <= min(open, close) <= max(open, close) <= high`.

/// A numerically coherent OHLCV tuple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SanitizedOhlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Repair an OHLCV tuple, or return `None` when `open` or `close` is missing
/// or non-finite.
///
/// Missing (or non-finite) `high`/`low` are synthesized from open/close;
/// swapped extremes are un-swapped; finally both are expanded to cover open
/// and close so the coherence invariant holds unconditionally. Missing or
/// negative volume becomes 0.
pub fn sanitize_ohlc(
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
) -> Option<SanitizedOhlc> {
    let open = open.filter(|v| v.is_finite())?;
    let close = close.filter(|v| v.is_finite())?;

    let mut high = high.filter(|v| v.is_finite()).unwrap_or_else(|| open.max(close));
    let mut low = low.filter(|v| v.is_finite()).unwrap_or_else(|| open.min(close));

    if high < low {
        std::mem::swap(&mut high, &mut low);
    }

    high = high.max(open).max(close);
    low = low.min(open).min(close);

    let volume = volume
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
        .max(0.0);

    Some(SanitizedOhlc {
        open,
        high,
        low,
        close,
        volume,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_coherent_input() {
        let c = sanitize_ohlc(Some(1.10), Some(1.12), Some(1.05), Some(1.09), Some(3.0)).unwrap();
        assert_eq!(c.open, 1.10);
        assert_eq!(c.high, 1.12);
        assert_eq!(c.low, 1.05);
        assert_eq!(c.close, 1.09);
        assert_eq!(c.volume, 3.0);
    }

    #[test]
    fn rejects_missing_open_or_close() {
        assert!(sanitize_ohlc(None, Some(1.0), Some(1.0), Some(1.0), None).is_none());
        assert!(sanitize_ohlc(Some(1.0), Some(1.0), Some(1.0), None, None).is_none());
        assert!(sanitize_ohlc(Some(f64::NAN), None, None, Some(1.0), None).is_none());
        assert!(sanitize_ohlc(Some(1.0), None, None, Some(f64::INFINITY), None).is_none());
    }

    #[test]
    fn synthesizes_missing_extremes() {
        let c = sanitize_ohlc(Some(1.10), None, None, Some(1.09), None).unwrap();
        assert_eq!(c.high, 1.10);
        assert_eq!(c.low, 1.09);
    }

    #[test]
    fn swaps_then_expands() {
        // high < low: swap to (high=1.12, low=1.05), then expand over
        // open/close — already covered, so the swap result stands.
        let c =
            sanitize_ohlc(Some(1.10), Some(1.05), Some(1.12), Some(1.09), None).unwrap();
        assert_eq!(c.high, 1.12);
        assert_eq!(c.low, 1.05);
        assert_eq!(c.open, 1.10);
        assert_eq!(c.close, 1.09);
    }

    #[test]
    fn expands_extremes_to_cover_open_and_close() {
        let c = sanitize_ohlc(Some(2.0), Some(1.5), Some(1.0), Some(0.5), None).unwrap();
        assert_eq!(c.high, 2.0);
        assert_eq!(c.low, 0.5);
    }

    #[test]
    fn coherence_holds_for_awkward_inputs() {
        let cases = [
            (Some(1.0), Some(0.5), Some(2.0), Some(1.5), Some(-3.0)),
            (Some(10.0), None, Some(50.0), Some(20.0), None),
            (Some(-1.0), Some(-5.0), None, Some(-2.0), Some(f64::NAN)),
        ];
        for (o, h, l, c, v) in cases {
            let s = sanitize_ohlc(o, h, l, c, v).unwrap();
            assert!(s.low <= s.open.min(s.close), "{s:?}");
            assert!(s.open.max(s.close) <= s.high, "{s:?}");
            assert!(s.low <= s.high, "{s:?}");
            assert!(s.volume >= 0.0, "{s:?}");
        }
    }

    #[test]
    fn non_finite_extremes_treated_as_missing() {
        let c = sanitize_ohlc(Some(1.0), Some(f64::NAN), Some(f64::NEG_INFINITY), Some(2.0), None)
            .unwrap();
        assert_eq!(c.high, 2.0);
        assert_eq!(c.low, 1.0);
    }
}
