//! Runtime configuration
//!
//! Timing and transport settings for both device roles. Loaded from and saved
//! to JSON; every field has a default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::RelayError;
use crate::transport::HRV_DATA_PATH;

/// Default measurement window length in seconds
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Default rest between windows in seconds
pub const DEFAULT_REST_SECS: u64 = 240;

/// Default per-peer enqueue timeout in milliseconds
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;

/// Default trailing window of the aggregate snapshot in hours
pub const DEFAULT_SNAPSHOT_HOURS: i64 = 24;

/// Longest accepted snapshot window in hours (one leap year)
pub const MAX_SNAPSHOT_HOURS: i64 = 24 * 366;

/// Measurement loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub window_secs: u64,
    pub rest_secs: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            rest_secs: DEFAULT_REST_SECS,
        }
    }
}

impl SamplerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn rest(&self) -> Duration {
        Duration::from_secs(self.rest_secs)
    }
}

/// Datagram transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub path: String,
    pub send_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            path: HRV_DATA_PATH.to_string(),
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
        }
    }
}

impl TransportConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Query relay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub snapshot_hours: i64,
}

impl QueryConfig {
    /// Snapshot window length; `snapshot_hours` must be in `1..=MAX_SNAPSHOT_HOURS`
    pub fn snapshot_window(&self) -> Result<chrono::Duration, RelayError> {
        if !(1..=MAX_SNAPSHOT_HOURS).contains(&self.snapshot_hours) {
            return Err(RelayError::InvalidArguments(format!(
                "query.snapshot_hours must be between 1 and {}, got {}",
                MAX_SNAPSHOT_HOURS, self.snapshot_hours
            )));
        }
        chrono::Duration::try_hours(self.snapshot_hours).ok_or_else(|| {
            RelayError::InvalidArguments(format!(
                "query.snapshot_hours out of range: {}",
                self.snapshot_hours
            ))
        })
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            snapshot_hours: DEFAULT_SNAPSHOT_HOURS,
        }
    }
}

/// Complete relay configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub sampler: SamplerConfig,
    pub transport: TransportConfig,
    pub query: QueryConfig,
}

impl RelayConfig {
    /// Load and validate configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, RelayError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot constrain
    pub fn validate(&self) -> Result<(), RelayError> {
        self.query.snapshot_window()?;
        Ok(())
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
