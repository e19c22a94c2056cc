//! Configuration for the sync client.
//!
//! Every struct has a `Default` carrying the production constants. A JSON
//! document may override any subset; durations are given in milliseconds.

use crate::error::{Result, SyncError};
use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub stream: StreamConfig,
    pub throttle: ThrottleConfig,
    pub reconcile: ReconcileConfig,
    pub cache: CacheConfig,
}

impl SyncConfig {
    /// Parse a JSON document, filling omitted fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.stream.backoff_base_ms == 0 {
            return Err(SyncError::InvalidConfig("backoff_base_ms must be > 0".into()));
        }
        if self.throttle.window_ms == 0 {
            return Err(SyncError::InvalidConfig("window_ms must be > 0".into()));
        }
        if self.reconcile.max_operations == 0 {
            return Err(SyncError::InvalidConfig("max_operations must be > 0".into()));
        }
        if self.cache.row_entries == 0 {
            return Err(SyncError::InvalidConfig("row_entries must be > 0".into()));
        }
        Ok(())
    }
}

/// Topic stream connection and reconnection settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Pause after a transport failure before the reconnect loop starts.
    /// Default: 3s
    pub failure_grace_ms: u64,

    /// First reconnect delay; doubles per failed attempt.
    /// Default: 1s
    pub backoff_base_ms: u64,

    /// Accumulated reconnect time after which retrying is abandoned.
    /// Default: 24h
    pub reconnect_ceiling_ms: u64,

    /// How long a connected transport may take to send `CONNECTED`.
    /// Default: 10s
    pub handshake_timeout_ms: u64,
}

impl StreamConfig {
    pub fn failure_grace(&self) -> Duration {
        Duration::from_millis(self.failure_grace_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn reconnect_ceiling(&self) -> Duration {
        Duration::from_millis(self.reconnect_ceiling_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            failure_grace_ms: 3_000,
            backoff_base_ms: 1_000,
            reconnect_ceiling_ms: 24 * 60 * 60 * 1_000,
            handshake_timeout_ms: 10_000,
        }
    }
}

/// Per-key throttle settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Window during which same-key values collapse into the latest.
    /// Default: 1s
    pub window_ms: u64,
}

impl ThrottleConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { window_ms: 1_000 }
    }
}

/// Reconciliation settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Structural and content edits allowed per cycle before falling back
    /// to full replacement.
    /// Default: 100
    pub max_operations: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { max_operations: 100 }
    }
}

/// Cache bounds and refresh cadence.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default: 100
    pub row_entries: usize,
    /// Default: 200
    pub match_entries: usize,
    /// Default: 500
    pub odds_entries: usize,
    /// Interval for the refreshing snapshot mode.
    /// Default: 30s
    pub refresh_interval_ms: u64,
}

impl CacheConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            row_entries: 100,
            match_entries: 200,
            odds_entries: 500,
            refresh_interval_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.stream.failure_grace(), Duration::from_secs(3));
        assert_eq!(config.stream.backoff_base(), Duration::from_secs(1));
        assert_eq!(config.stream.reconnect_ceiling(), Duration::from_secs(86_400));
        assert_eq!(config.throttle.window(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_override() {
        let json = r#"{"throttle":{"window_ms":250},"reconcile":{"max_operations":7}}"#;
        let config = SyncConfig::from_json(json).unwrap();
        assert_eq!(config.throttle.window(), Duration::from_millis(250));
        assert_eq!(config.reconcile.max_operations, 7);
        assert_eq!(config.stream.backoff_base_ms, 1_000);
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = SyncConfig::from_json(r#"{"throttle":{"window_ms":0}}"#);
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let result = SyncConfig::from_json("{not json");
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }
}
