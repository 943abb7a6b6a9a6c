//! Error types for vitalwatch.
//!
//! Each boundary has its own error enum. Per-cycle failures (`UpstreamError`,
//! most `StoreError`s) are contained inside a collector; only
//! [`CollectorError`] and [`FleetError`] ever leave a running loop.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::model::EntityId;

/// Failure fetching a snapshot from the upstream source.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Request(String),

    #[error("upstream returned HTTP {status}")]
    Status { status: u16 },

    #[error("upstream fetch timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("malformed upstream payload: {0}")]
    Malformed(String),
}

impl UpstreamError {
    /// Timeout after `limit`, saturating at `u64::MAX` milliseconds.
    pub fn timeout(limit: Duration) -> Self {
        Self::Timeout {
            millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Failure talking to the sample store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached at all (refused, dropped, I/O).
    #[error("sample store unavailable: {0}")]
    Unavailable(String),

    /// A single operation was rejected.
    #[error("sample store command failed: {0}")]
    Command(String),

    /// A stored value could not be decoded.
    #[error("corrupt value under key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("unsupported store url '{0}'")]
    UnsupportedUrl(String),
}

impl StoreError {
    /// Whether this error counts towards collector escalation.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Which of a collector's two loops an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    Poll,
    Evict,
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => write!(f, "poll"),
            Self::Evict => write!(f, "evict"),
        }
    }
}

/// Terminal failure of one collector loop.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error(
        "entity {entity}: {loop_kind} loop gave up after {failures} consecutive store failures: {source}"
    )]
    StoreUnavailable {
        entity: EntityId,
        loop_kind: LoopKind,
        failures: u64,
        #[source]
        source: StoreError,
    },
}

impl CollectorError {
    pub fn entity(&self) -> EntityId {
        match self {
            Self::StoreUnavailable { entity, .. } => *entity,
        }
    }
}

/// Invalid configuration.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Failure of the fleet as a whole.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("sample store unreachable at startup: {0}")]
    StoreUnreachable(#[source] StoreError),

    #[error(transparent)]
    Collector(#[from] CollectorError),

    #[error("collector task for entity {entity} panicked: {reason}")]
    Join { entity: EntityId, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_unavailable_classification() {
        assert!(StoreError::Unavailable("refused".into()).is_unavailable());
        assert!(!StoreError::Command("WRONGTYPE".into()).is_unavailable());
        assert!(
            !StoreError::Corrupt {
                key: "1_timestamp".into(),
                reason: "bad".into()
            }
            .is_unavailable()
        );
    }

    #[test]
    fn test_upstream_timeout_millis_saturate() {
        assert!(matches!(
            UpstreamError::timeout(Duration::from_millis(1500)),
            UpstreamError::Timeout { millis: 1500 }
        ));
        assert!(matches!(
            UpstreamError::timeout(Duration::MAX),
            UpstreamError::Timeout { millis: u64::MAX }
        ));
    }

    #[test]
    fn test_collector_error_message_names_entity_and_loop() {
        let err = CollectorError::StoreUnavailable {
            entity: EntityId::new(4).unwrap(),
            loop_kind: LoopKind::Evict,
            failures: 30,
            source: StoreError::Unavailable("connection refused".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("entity 4"));
        assert!(msg.contains("evict loop"));
        assert!(msg.contains("30"));
        assert_eq!(err.entity().get(), 4);
    }
}
