//! Configuration for the driftwave playback engine
//!
//! All settings have built-in defaults defined in code; a TOML file may
//! override any subset of them. Configuration cannot change while the engine
//! is running.

use crate::error::{Error, Result};
use crate::timing::Watermarks;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Engine configuration loaded from TOML (or built-in defaults)
///
/// **Minimal by design** — only the knobs the streaming/scheduling engine
/// actually consults. Every field has a default, so an empty TOML document is
/// a valid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Shared ring buffer capacity in bytes (compressed audio)
    pub ring_capacity_bytes: usize,

    /// Decode chunk size in samples requested from the engine
    pub chunk_size: usize,

    /// Buffered-ahead seconds above which the decode engine is paused
    pub high_watermark_secs: f64,

    /// Buffered-ahead seconds below which a paused decode engine is resumed
    pub low_watermark_secs: f64,

    /// Gain fade duration for play/pause (seconds)
    pub fade_secs: f64,

    /// Gain fade duration for seeks (seconds)
    pub seek_fade_secs: f64,

    /// Gain ramp duration for volume changes while playing (seconds)
    pub volume_ramp_secs: f64,

    /// Default timeout for decode engine requests (milliseconds)
    pub request_timeout_ms: u64,

    /// Timeout for audio export requests (milliseconds)
    pub export_timeout_ms: u64,

    /// Interval between time-update events while playing (milliseconds)
    pub time_update_interval_ms: u64,

    /// Event bus channel capacity
    pub event_bus_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_capacity_bytes: 2 * 1024 * 1024,
            chunk_size: 4096 * 8,
            high_watermark_secs: 30.0,
            low_watermark_secs: 10.0,
            fade_secs: 0.15,
            seek_fade_secs: 0.05,
            volume_ramp_secs: 0.05,
            request_timeout_ms: 5_000,
            export_timeout_ms: 30_000,
            time_update_interval_ms: 100,
            event_bus_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded engine configuration from {}", path.display());
        Ok(config)
    }

    /// Validate configuration invariants
    pub fn validate(&self) -> Result<()> {
        if self.ring_capacity_bytes == 0 {
            return Err(Error::Config("ring_capacity_bytes must be non-zero".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be non-zero".into()));
        }
        if !(self.low_watermark_secs >= 0.0 && self.low_watermark_secs < self.high_watermark_secs) {
            return Err(Error::Config(format!(
                "watermarks must satisfy 0 <= low < high (got low={}, high={})",
                self.low_watermark_secs, self.high_watermark_secs
            )));
        }
        for (name, value) in [
            ("fade_secs", self.fade_secs),
            ("seek_fade_secs", self.seek_fade_secs),
            ("volume_ramp_secs", self.volume_ramp_secs),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(Error::Config(format!("{name} must be a non-negative number")));
            }
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be non-zero".into()));
        }
        if self.event_bus_capacity == 0 {
            return Err(Error::Config("event_bus_capacity must be non-zero".into()));
        }
        Ok(())
    }

    /// Watermark pair for the playback scheduler
    pub fn watermarks(&self) -> Watermarks {
        Watermarks {
            high: self.high_watermark_secs,
            low: self.low_watermark_secs,
        }
    }

    /// Default decode engine request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Export request timeout
    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }

    /// Time-update emission interval
    pub fn time_update_interval(&self) -> Duration {
        Duration::from_millis(self.time_update_interval_ms)
    }
}
