// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The broker push endpoint is the only
// one requiring authentication (HMAC body signature); the relay, import and
// backfill feeds run inside the trust boundary and the read side is public.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Json, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::{verify_signature, SIGNATURE_HEADER};
use crate::api::wire::{
    broker_records, relay_records, series_records, BrokerPushPayload, RelayPayload, SeriesPayload,
};
use crate::app_state::AppState;
use crate::engine::normalize_symbol;
use crate::types::{IngestSummary, RawRecord, Source, Timeframe};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Health & info ───────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/info", get(server_info))
        // ── Ingestion (one route per upstream feed) ─────────────────
        .route("/api/v1/broker/candles", post(broker_candles))
        .route("/api/v1/relay/candles", post(relay_candles))
        .route("/api/v1/import/candles", post(import_candles))
        .route("/api/v1/backfill/candles", post(backfill_candles))
        // ── Query ───────────────────────────────────────────────────
        .route("/api/v1/candles", get(query_candles))
        .route("/api/v1/symbols", get(list_symbols))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

// =============================================================================
// Health & info
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "server_time": Utc::now().to_rfc3339(),
    }))
}

async fn server_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.runtime_config.read().clone();
    let stats = state.stats();
    Json(serde_json::json!({
        "service": "candle-hub",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "uptime_seconds": stats.uptime_seconds,
        "total_merged": stats.total_merged,
        "total_skipped": stats.total_skipped,
        "total_dropped": stats.total_dropped,
        "total_clock_fallbacks": stats.total_clock_fallbacks,
        "active_symbols": state.store.symbols(),
        "broker_tz_offset_minutes": config.broker_tz_offset_minutes,
        "max_buffer_candles": config.max_buffer_candles,
        "query_closed_limit": config.query_closed_limit,
    }))
}

// =============================================================================
// Ingestion
// =============================================================================

#[derive(Serialize)]
struct IngestResponse {
    status: &'static str,
    #[serde(flatten)]
    summary: IngestSummary,
}

/// Run a decoded batch through the engine and fold the outcome into the
/// lifetime counters.
fn ingest_and_respond(state: &AppState, records: Vec<RawRecord>) -> Response {
    let count = records.len();
    let summary = state.store.ingest(records);
    state.record_summary(&summary);
    info!(
        records = count,
        merged = summary.merged,
        skipped = summary.skipped,
        dropped = summary.dropped,
        "ingest batch processed"
    );
    Json(IngestResponse {
        status: "success",
        summary,
    })
    .into_response()
}

/// Broker push feed: HMAC-signed body, broker-local timestamps.
async fn broker_candles(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let secret = std::env::var("CANDLE_HUB_INGEST_SECRET").unwrap_or_default();
    if secret.is_empty() {
        warn!("CANDLE_HUB_INGEST_SECRET is not set — rejecting broker push");
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "ingestion authentication not configured" })),
        )
            .into_response();
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_signature(&secret, &body, signature) {
        warn!("broker push rejected: invalid signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "invalid signature" })),
        )
            .into_response();
    }

    let payload: BrokerPushPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => return bad_request(format!("malformed payload: {e}")),
    };
    match broker_records(payload) {
        Ok(records) => ingest_and_respond(&state, records),
        Err(e) => bad_request(e),
    }
}

/// External relay feed: pre-computed buckets, `max`/`min` extremes.
async fn relay_candles(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RelayPayload>,
) -> Response {
    match relay_records(payload, Utc::now().timestamp()) {
        Ok(records) => ingest_and_respond(&state, records),
        Err(e) => bad_request(e),
    }
}

/// Historical file importer: exact bucket times, always closed.
async fn import_candles(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SeriesPayload>,
) -> Response {
    match series_records(payload, Source::HistoricalImport) {
        Ok(records) => ingest_and_respond(&state, records),
        Err(e) => bad_request(e),
    }
}

/// Third-party market-data backfill: same shape as import, lower priority.
async fn backfill_candles(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SeriesPayload>,
) -> Response {
    match series_records(payload, Source::MarketDataBackfill) {
        Ok(records) => ingest_and_respond(&state, records),
        Err(e) => bad_request(e),
    }
}

// =============================================================================
// Query
// =============================================================================

#[derive(Deserialize)]
struct CandleQuery {
    symbol: String,
    #[serde(default)]
    limit: Option<usize>,
    /// Optional filter; the store holds all timeframes for a symbol.
    #[serde(default)]
    timeframe: Option<String>,
}

async fn query_candles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CandleQuery>,
) -> Response {
    let symbol = normalize_symbol(&query.symbol);
    let limit = query
        .limit
        .unwrap_or_else(|| state.runtime_config.read().query_closed_limit)
        .max(1);

    let timeframe = match query.timeframe.as_deref() {
        Some(raw) => match Timeframe::parse(raw) {
            Some(tf) => Some(tf),
            None => return bad_request(format!("invalid timeframe: {raw:?}")),
        },
        None => None,
    };

    let mut candles = state.store.view(&symbol, limit);
    if let Some(tf) = timeframe {
        candles.retain(|c| c.timeframe == tf);
    }

    Json(serde_json::json!({
        "symbol": symbol,
        "count": candles.len(),
        "candles": candles,
        "server_time": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

async fn list_symbols(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let symbols = state.store.symbols();
    Json(serde_json::json!({
        "count": symbols.len(),
        "symbols": symbols,
    }))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::RuntimeConfig;

    fn test_state() -> Arc<AppState> {
        let mut config = RuntimeConfig::default();
        config.enable_csv_sink = false;
        Arc::new(AppState::new(config).unwrap())
    }

    #[test]
    fn router_builds() {
        let _ = router(test_state());
    }

    #[test]
    fn ingest_and_respond_updates_counters() {
        let state = test_state();
        let payload: SeriesPayload = serde_json::from_str(
            r#"{"symbol":"EUR/USD ","timeframe":"M5",
                "candles":[{"time":300,"open":1.0,"high":1.2,"low":0.9,"close":1.1}]}"#,
        )
        .unwrap();
        let records = series_records(payload, Source::HistoricalImport).unwrap();
        let _ = ingest_and_respond(&state, records);

        assert_eq!(state.stats().total_merged, 1);
        assert_eq!(state.store.symbols(), vec!["EURUSD".to_string()]);
    }
}
