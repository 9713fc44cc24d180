//! Tunable protocol constants.
//!
//! Every timing constant of the protocol lives here with the reference
//! values as defaults, so deployments can tune them from a TOML file
//! without touching the state machines.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// How consecutive clock offset samples are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum OffsetFilter {
    /// Each new sample fully replaces the previous estimate.
    #[default]
    LastSample,
    /// Exponential moving average; `alpha` is the weight of the newest sample.
    Ewma { alpha: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SyncConfig {
    /// Listener probe period.
    pub probe_interval_ms: u64,
    /// Admin heartbeat period.
    pub heartbeat_interval_ms: u64,
    /// Drift above this (exclusive) is fixed with a seek instead of a rate nudge.
    pub hard_correction_threshold_secs: f64,
    /// Proportional gain applied to drift when nudging the playback rate.
    pub rate_gain: f64,
    /// Delay before a nudged playback rate falls back to 1.0.
    pub rate_reset_after_ms: u64,
    pub offset_filter: OffsetFilter,
    /// Drop intents whose `sentAt` is older than the newest one applied.
    pub discard_stale_intents: bool,
    /// Evict registered listeners not heard from within this window.
    /// `None` keeps membership purely best-effort.
    pub registry_idle_timeout_ms: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 2000,
            heartbeat_interval_ms: 2000,
            hard_correction_threshold_secs: 0.3,
            rate_gain: 0.2,
            rate_reset_after_ms: 1000,
            offset_filter: OffsetFilter::LastSample,
            discard_stale_intents: false,
            registry_idle_timeout_ms: None,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: SyncConfig =
            toml::from_str(raw).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.probe_interval_ms == 0 || self.heartbeat_interval_ms == 0 {
            return Err(SyncError::Config("intervals must be non-zero".into()));
        }
        if !(self.hard_correction_threshold_secs > 0.0) {
            return Err(SyncError::Config(
                "hard-correction-threshold-secs must be positive".into(),
            ));
        }
        if !(self.rate_gain >= 0.0) {
            return Err(SyncError::Config("rate-gain must not be negative".into()));
        }
        if let OffsetFilter::Ewma { alpha } = self.offset_filter {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(SyncError::Config("ewma alpha must be in (0, 1]".into()));
            }
        }
        if self.registry_idle_timeout_ms == Some(0) {
            return Err(SyncError::Config(
                "registry-idle-timeout-ms must be non-zero when set".into(),
            ));
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rate_reset_after(&self) -> Duration {
        Duration::from_millis(self.rate_reset_after_ms)
    }

    pub fn registry_idle_timeout(&self) -> Option<Duration> {
        self.registry_idle_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let config = SyncConfig::default();
        assert_eq!(config.probe_interval(), Duration::from_millis(2000));
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(2000));
        assert_eq!(config.hard_correction_threshold_secs, 0.3);
        assert_eq!(config.rate_gain, 0.2);
        assert_eq!(config.rate_reset_after(), Duration::from_millis(1000));
        assert_eq!(config.offset_filter, OffsetFilter::LastSample);
        assert!(config.registry_idle_timeout().is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str(
            r#"
            heartbeat-interval-ms = 500
            offset-filter = { mode = "ewma", alpha = 0.25 }
            "#,
        )
        .unwrap();
        assert_eq!(config.heartbeat_interval_ms, 500);
        assert_eq!(config.probe_interval_ms, 2000);
        assert_eq!(config.offset_filter, OffsetFilter::Ewma { alpha: 0.25 });
    }

    #[test]
    fn rejects_bad_values() {
        assert!(SyncConfig::from_toml_str("probe-interval-ms = 0").is_err());
        assert!(SyncConfig::from_toml_str("hard-correction-threshold-secs = -1.0").is_err());
        assert!(SyncConfig::from_toml_str(r#"offset-filter = { mode = "ewma", alpha = 2.0 }"#).is_err());
        assert!(SyncConfig::from_toml_str("rate-gain = \"fast\"").is_err());
    }
}
