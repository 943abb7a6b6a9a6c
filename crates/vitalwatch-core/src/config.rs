//! Runtime configuration consumed by the collectors and the fleet.
//!
//! The core never loads configuration itself; callers build a
//! [`VitalwatchConfig`] (the CLI does so from flags and `VITALWATCH_*`
//! environment variables) and hand it over read-only.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierPolicy;
use crate::error::ConfigError;
use crate::model::{DEFAULT_CHANNELS, EntityId};

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalwatchConfig {
    /// Delay between polls of one entity.
    pub poll_interval: Duration,
    /// Delay between eviction passes of one entity.
    pub cleanup_interval: Duration,
    /// Records at least this old are evicted from the readings window.
    pub max_window_secs: u64,
    /// Probability that the simulated classifier flags a snapshot.
    pub anomaly_rate: f64,
    pub classifier: ClassifierPolicy,
    /// Expected number of sensor channels per snapshot.
    pub channels: usize,
    pub entity_ids: Vec<EntityId>,
    /// Entity ids are appended to this to form the request URL.
    pub upstream_base_url: String,
    pub upstream_timeout: Duration,
    pub store_url: String,
    /// Consecutive "store unreachable" errors tolerated before a collector gives up.
    pub store_failure_limit: u64,
}

impl Default for VitalwatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(5),
            max_window_secs: 300,
            anomaly_rate: 0.05,
            classifier: ClassifierPolicy::Simulated,
            channels: DEFAULT_CHANNELS,
            entity_ids: (1..=6).filter_map(EntityId::new).collect(),
            upstream_base_url: "http://localhost:5000/patient/".to_string(),
            upstream_timeout: Duration::from_secs(5),
            store_url: "redis://127.0.0.1:6379/".to_string(),
            store_failure_limit: 30,
        }
    }
}

impl VitalwatchConfig {
    /// Reject configurations the collectors cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError("poll interval must be positive".into()));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError("cleanup interval must be positive".into()));
        }
        if self.upstream_timeout.is_zero() {
            return Err(ConfigError("upstream timeout must be positive".into()));
        }
        if self.max_window_secs == 0 {
            return Err(ConfigError("retention window must be positive".into()));
        }
        if i64::try_from(self.max_window_secs).is_err() {
            return Err(ConfigError(format!(
                "retention window {}s is too large",
                self.max_window_secs
            )));
        }
        if !(0.0..=1.0).contains(&self.anomaly_rate) {
            return Err(ConfigError(format!(
                "anomaly rate {} is outside [0, 1]",
                self.anomaly_rate
            )));
        }
        if self.channels == 0 {
            return Err(ConfigError("channel count must be positive".into()));
        }
        if self.entity_ids.is_empty() {
            return Err(ConfigError("no entity ids configured".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.entity_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(ConfigError(format!("entity id {dup} is listed twice")));
        }
        if self.store_failure_limit == 0 {
            return Err(ConfigError("store failure limit must be positive".into()));
        }
        Ok(())
    }

    /// The per-collector subset of this configuration.
    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            poll_interval: self.poll_interval,
            cleanup_interval: self.cleanup_interval,
            max_window_secs: self.max_window_secs,
            fetch_timeout: self.upstream_timeout,
            store_failure_limit: self.store_failure_limit,
        }
    }
}

/// Timing and escalation settings for one collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorSettings {
    pub poll_interval: Duration,
    pub cleanup_interval: Duration,
    pub max_window_secs: u64,
    /// Upper bound on a single upstream fetch, enforced by the collector.
    pub fetch_timeout: Duration,
    pub store_failure_limit: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        VitalwatchConfig::default().collector_settings()
    }
}
