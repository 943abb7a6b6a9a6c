//! # vitalwatch-core
//!
//! **Per-entity telemetry ingestion with a trailing retention window.**
//!
//! `vitalwatch-core` polls an upstream source for the current sensor snapshot
//! of every tracked entity, appends timestamped snapshots to an ordered-list
//! store, logs anomalous snapshots separately, and keeps each entity's readings
//! trimmed to a fixed trailing time window.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use vitalwatch_core::{Fleet, HttpUpstream, SystemClock, VitalwatchConfig, connect_store};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = VitalwatchConfig::default();
//! let store = connect_store(&config.store_url).await?;
//! let upstream = HttpUpstream::new(
//!     config.upstream_base_url.clone(),
//!     config.upstream_timeout,
//!     config.channels,
//! )?;
//!
//! let fleet = Fleet::from_config(&config, store, Arc::new(upstream), Arc::new(SystemClock))?;
//! let cancel = fleet.cancel_token();
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(60)).await;
//!     cancel.cancel();
//! });
//!
//! let report = fleet.run().await?;
//! println!("{}/{} entities healthy", report.healthy, report.total);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────── Fleet ────────────┐
//!                 │  one Collector per EntityId   │
//!                 └───────────────────────────────┘
//!   Upstream ──► Classifier ──► Collector::poll ──► SampleStore ({id}_data, ...)
//!                               Collector::evict ◄─┘  (trims oldest end)
//!                                                  └─► WindowReader (read-only)
//! ```
//!
//! Every collaborator sits behind a trait ([`Upstream`], [`SampleStore`],
//! [`Classifier`], [`Clock`]) and is injected at construction, so a single
//! [`Collector`] can be driven in isolation.

pub mod classifier;
pub mod clock;
pub mod collector;
pub mod config;
pub mod error;
pub mod fleet;
pub mod model;
pub mod store;
pub mod upstream;
pub mod window;

pub use classifier::{
    Classifier, ClassifierPolicy, SimulatedClassifier, UpstreamFlagsClassifier, build_classifier,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::{Collector, CollectorDeps, CollectorHealth, PollOutcome};
pub use config::{CollectorSettings, VitalwatchConfig};
pub use error::{
    CollectorError, ConfigError, FleetError, LoopKind, StoreError, UpstreamError,
};
pub use fleet::{Fleet, FleetReport};
pub use model::{
    DEFAULT_CHANNELS, EntityId, EntityProfile, Reading, Snapshot, TimestampedRecord,
};
pub use store::{
    EntityKeys, MemoryStore, RedisStore, SampleStore, SequencePair, connect_store,
};
pub use upstream::{FetchedSnapshot, HttpUpstream, Upstream, parse_payload};
pub use window::{WindowReader, WindowStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
