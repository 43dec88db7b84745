// =============================================================================
// Symbol Normalization
// =============================================================================
//
// Upstream feeds disagree wildly on instrument naming: the broker agent sends
// `EUR/USD`, file imports carry `eurusd`, relay payloads show up with suffix
// markers like `EURUSD-OTC` or `#EURUSD`. Everything is collapsed to a single
// canonical key so that all feeds land in the same per-symbol store.

/// Canonicalize an instrument identifier.
///
/// Uppercases, strips surrounding whitespace and path-style separators, then
/// drops every character that is not `A-Z` or `0-9` (this subsumes the
/// suffix markers `=`, `-` and `#`). Inputs that normalize to nothing yield
/// the sentinel `"UNKNOWN"`.
///
/// Pure and idempotent; there is no failure mode.
pub fn normalize_symbol(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .flat_map(char::to_uppercase)
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect();

    if cleaned.is_empty() {
        "UNKNOWN".to_string()
    } else {
        cleaned
    }
}

// =============================================================================
// Tests
// =============================================================================
