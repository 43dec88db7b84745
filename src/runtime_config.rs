// =============================================================================
// Runtime Configuration — consolidation server settings with atomic save
// =============================================================================
//
// Every tunable parameter of the candle hub lives here. Persistence uses an
// atomic tmp + rename pattern to prevent corruption on crash. All fields
// carry `#[serde(default)]` so that adding new fields never breaks loading an
// older config file.
//
// The ingest HMAC secret deliberately does NOT live in this file — it is read
// from the `CANDLE_HUB_INGEST_SECRET` environment variable so that a saved
// config never leaks credentials.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_broker_tz_offset_minutes() -> i32 {
    0
}

fn default_max_buffer_candles() -> usize {
    2000
}

fn default_query_closed_limit() -> usize {
    300
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_data_dir() -> String {
    "historical_data".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the candle hub.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Fixed UTC offset of the broker's server clock, in signed minutes.
    /// Zone-less feed timestamps are interpreted in this offset and candle
    /// buckets are aligned under it.
    #[serde(default = "default_broker_tz_offset_minutes")]
    pub broker_tz_offset_minutes: i32,

    /// Maximum closed candles retained in memory per symbol; the oldest are
    /// evicted silently beyond this.
    #[serde(default = "default_max_buffer_candles")]
    pub max_buffer_candles: usize,

    /// Default number of closed candles served to query consumers.
    #[serde(default = "default_query_closed_limit")]
    pub query_closed_limit: usize,

    /// Address the HTTP API binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Directory for the durable CSV sink.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Whether finalized candles are written through to CSV.
    #[serde(default = "default_true")]
    pub enable_csv_sink: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            broker_tz_offset_minutes: default_broker_tz_offset_minutes(),
            max_buffer_candles: default_max_buffer_candles(),
            query_closed_limit: default_query_closed_limit(),
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
            enable_csv_sink: true,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            broker_tz_offset_minutes = config.broker_tz_offset_minutes,
            max_buffer_candles = config.max_buffer_candles,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `CANDLE_HUB_*` environment overrides on top of the loaded file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("CANDLE_HUB_BIND_ADDR") {
            if !addr.is_empty() {
                self.bind_addr = addr;
            }
        }
        if let Ok(raw) = std::env::var("CANDLE_HUB_BROKER_TZ_OFFSET_MINUTES") {
            match raw.parse::<i32>() {
                Ok(v) => self.broker_tz_offset_minutes = v,
                Err(_) => {
                    tracing::warn!(raw = %raw, "ignoring non-numeric CANDLE_HUB_BROKER_TZ_OFFSET_MINUTES")
                }
            }
        }
        if let Ok(dir) = std::env::var("CANDLE_HUB_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = dir;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.broker_tz_offset_minutes, 0);
        assert_eq!(cfg.max_buffer_candles, 2000);
        assert_eq!(cfg.query_closed_limit, 300);
        assert_eq!(cfg.bind_addr, "0.0.0.0:3001");
        assert_eq!(cfg.data_dir, "historical_data");
        assert!(cfg.enable_csv_sink);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.max_buffer_candles, 2000);
        assert_eq!(cfg.query_closed_limit, 300);
        assert!(cfg.enable_csv_sink);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "broker_tz_offset_minutes": 180, "max_buffer_candles": 500 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.broker_tz_offset_minutes, 180);
        assert_eq!(cfg.max_buffer_candles, 500);
        assert_eq!(cfg.query_closed_limit, 300);
    }

    #[test]
    fn roundtrip_serialisation() {
        let mut cfg = RuntimeConfig::default();
        cfg.broker_tz_offset_minutes = -300;
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg2.broker_tz_offset_minutes, -300);
        assert_eq!(cfg2.max_buffer_candles, cfg.max_buffer_candles);
    }
}
