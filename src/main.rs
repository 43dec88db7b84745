// =============================================================================
// Candle Hub — Main Entry Point
// =============================================================================
//
// Consolidation server for multi-feed OHLCV candles: broker push agent,
// historical file importer, market-data backfill and external relay all land
// in one priority-merged, per-symbol store served over HTTP.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod engine;
mod runtime_config;
mod sink;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "candle_hub.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Candle Hub — Starting Up                          ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    info!(
        broker_tz_offset_minutes = config.broker_tz_offset_minutes,
        max_buffer_candles = config.max_buffer_candles,
        csv_sink = config.enable_csv_sink,
        "Configuration resolved"
    );

    if std::env::var("CANDLE_HUB_INGEST_SECRET")
        .unwrap_or_default()
        .is_empty()
    {
        warn!("CANDLE_HUB_INGEST_SECRET is not set — broker push ingestion will be rejected");
    }

    // ── 2. Build shared state ────────────────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config)?);

    // ── 3. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let server_addr = bind_addr.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&server_addr)
            .await
            .expect("Failed to bind API server");
        info!(addr = %server_addr, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    let stats = state.stats();
    info!(
        total_merged = stats.total_merged,
        total_skipped = stats.total_skipped,
        total_dropped = stats.total_dropped,
        "Final ingestion counters"
    );

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Candle Hub shut down complete.");
    Ok(())
}
