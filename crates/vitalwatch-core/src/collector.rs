//! Per-entity collector: a poll loop and an evict loop over the entity's keys.
//!
//! ```text
//! poll loop:   Fetching ─► Classifying ─► Appending ─► Sleeping ─┐
//!                 ▲                                              │
//!                 └──────────────────────────────────────────────┘
//!
//! evict loop:  Checking ─► Trimming (while head is stale) ─► Idle ─┐
//!                 ▲                                                │
//!                 └────────────────────────────────────────────────┘
//! ```
//!
//! The two loops touch opposite ends of the readings window (append at the
//! newest end, trim at the oldest) and are otherwise independent. Per-cycle
//! failures are logged and counted; a loop only terminates on cancellation or
//! when the store has been unreachable for `store_failure_limit` consecutive
//! operations.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::classifier::Classifier;
use crate::clock::Clock;
use crate::config::CollectorSettings;
use crate::error::{CollectorError, LoopKind, StoreError, UpstreamError};
use crate::model::{EntityId, EntityProfile, decode_timestamp, encode_timestamp};
use crate::store::{EntityKeys, SampleStore};
use crate::upstream::{FetchedSnapshot, Upstream};

/// Upper bound on records removed in one eviction pass. Anything left over is
/// picked up by the next pass.
pub const MAX_EVICTIONS_PER_PASS: usize = 10_000;

/// Shared collaborators injected into every collector.
#[derive(Clone)]
pub struct CollectorDeps {
    pub store: Arc<dyn SampleStore>,
    pub upstream: Arc<dyn Upstream>,
    pub classifier: Arc<dyn Classifier>,
    pub clock: Arc<dyn Clock>,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The snapshot was appended to the readings window.
    Recorded { anomalous: bool },
    /// Fetch failed or timed out; nothing was written.
    FetchFailed,
    /// The readings append failed; the sample is dropped.
    StoreFailed,
}

#[derive(Default)]
struct CollectorStats {
    polls_ok: AtomicU64,
    poll_failures: AtomicU64,
    records_appended: AtomicU64,
    anomalies_appended: AtomicU64,
    records_evicted: AtomicU64,
    store_failures: AtomicU64,
    consecutive_store_failures: AtomicU64,
    last_poll_ok: AtomicBool,
    last_poll_at: AtomicI64,
}

/// Point-in-time health of one collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorHealth {
    pub entity: EntityId,
    /// Last poll succeeded and the store is currently reachable.
    pub healthy: bool,
    pub polls_ok: u64,
    pub poll_failures: u64,
    pub records_appended: u64,
    pub anomalies_appended: u64,
    pub records_evicted: u64,
    pub store_failures: u64,
    pub consecutive_store_failures: u64,
    /// Unix seconds of the last successful poll.
    pub last_poll_at: Option<i64>,
}

/// The per-entity ingestion and retention unit.
pub struct Collector {
    entity: EntityId,
    keys: EntityKeys,
    deps: CollectorDeps,
    settings: CollectorSettings,
    stats: CollectorStats,
    last_profile: Mutex<Option<EntityProfile>>,
}

impl Collector {
    pub fn new(entity: EntityId, deps: CollectorDeps, settings: CollectorSettings) -> Self {
        Self {
            entity,
            keys: EntityKeys::for_entity(entity),
            deps,
            settings,
            stats: CollectorStats::default(),
            last_profile: Mutex::new(None),
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn keys(&self) -> &EntityKeys {
        &self.keys
    }

    // -----------------------------------------------------------------------
    // Poll
    // -----------------------------------------------------------------------

    /// Fetch the current snapshot, bounded by the configured fetch timeout.
    pub async fn fetch(&self) -> Result<FetchedSnapshot, UpstreamError> {
        let timeout = self.settings.fetch_timeout;
        match tokio::time::timeout(timeout, self.deps.upstream.fetch(self.entity)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::timeout(timeout)),
        }
    }

    /// Run one full poll cycle: fetch, classify, append.
    pub async fn poll_once(&self) -> Result<PollOutcome, CollectorError> {
        let fetched = self.fetch().await;
        self.record(fetched).await
    }

    /// Classify and persist a fetch result.
    async fn record(
        &self,
        fetched: Result<FetchedSnapshot, UpstreamError>,
    ) -> Result<PollOutcome, CollectorError> {
        let FetchedSnapshot { snapshot, profile } = match fetched {
            Ok(f) => f,
            Err(e) => {
                self.stats.poll_failures.fetch_add(1, Ordering::Relaxed);
                self.stats.last_poll_ok.store(false, Ordering::Relaxed);
                warn!("entity {}: poll failed: {e}", self.entity);
                return Ok(PollOutcome::FetchFailed);
            }
        };

        let snapshot = self.deps.classifier.classify(snapshot);
        let anomalous = snapshot.has_anomaly();
        let now = self.deps.clock.now_secs();
        self.stats.polls_ok.fetch_add(1, Ordering::Relaxed);
        self.stats.last_poll_ok.store(true, Ordering::Relaxed);
        self.stats.last_poll_at.store(now, Ordering::Relaxed);

        let encoded = match snapshot.encode() {
            Ok(s) => s,
            Err(e) => {
                warn!("entity {}: could not encode snapshot: {e}", self.entity);
                return Ok(PollOutcome::StoreFailed);
            }
        };
        let timestamp = encode_timestamp(now);

        let appended = self
            .deps
            .store
            .push_newest_pair(&self.keys.readings, &encoded, &timestamp)
            .await;
        let outcome = match self.check_store(LoopKind::Poll, "append reading", appended)? {
            Some(()) => {
                self.stats.records_appended.fetch_add(1, Ordering::Relaxed);
                debug!("entity {}: appended reading at {now}", self.entity);
                PollOutcome::Recorded { anomalous }
            }
            None => PollOutcome::StoreFailed,
        };

        if anomalous {
            let logged = self
                .deps
                .store
                .push_newest_pair(&self.keys.anomalies, &encoded, &timestamp)
                .await;
            if self
                .check_store(LoopKind::Poll, "append anomaly", logged)?
                .is_some()
            {
                self.stats.anomalies_appended.fetch_add(1, Ordering::Relaxed);
                info!(
                    "entity {}: anomaly on channel(s) {:?} at {now}",
                    self.entity,
                    snapshot.flagged_channels()
                );
            }
        }

        if !profile.is_empty() {
            self.write_profile(profile).await?;
        }

        Ok(outcome)
    }

    /// Overwrite the profile key when the profile changed since the last write.
    async fn write_profile(&self, profile: EntityProfile) -> Result<(), CollectorError> {
        let unchanged = self
            .last_profile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            == Some(&profile);
        if unchanged {
            return Ok(());
        }

        let encoded = match serde_json::to_string(&profile) {
            Ok(s) => s,
            Err(e) => {
                warn!("entity {}: could not encode profile: {e}", self.entity);
                return Ok(());
            }
        };
        let written = self.deps.store.set(&self.keys.profile, &encoded).await;
        if self
            .check_store(LoopKind::Poll, "write profile", written)?
            .is_some()
        {
            *self
                .last_profile
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(profile);
        }
        Ok(())
    }

    /// Poll until cancelled. Only an unreachable store ends the loop early.
    pub async fn run_poll_loop(&self, cancel: &CancellationToken) -> Result<(), CollectorError> {
        info!(
            "entity {}: poll loop started (every {:?})",
            self.entity, self.settings.poll_interval
        );
        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = self.fetch() => fetched,
            };
            // Writes are never raced against cancellation.
            self.record(fetched).await?;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
        info!("entity {}: poll loop stopped", self.entity);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Evict
    // -----------------------------------------------------------------------

    /// One draining eviction pass over the readings window.
    ///
    /// Removes records from the oldest end while the oldest timestamp is at
    /// least `max_window_secs` old. Returns how many records were removed.
    /// The anomaly log is never touched.
    pub async fn evict_once(&self) -> Result<usize, CollectorError> {
        let pair = &self.keys.readings;
        let window = i64::try_from(self.settings.max_window_secs).unwrap_or(i64::MAX);
        let mut evicted = 0;

        while evicted < MAX_EVICTIONS_PER_PASS {
            let peeked = self.deps.store.peek_oldest(&pair.timestamps).await;
            let Some(head) = self.check_store(LoopKind::Evict, "peek oldest timestamp", peeked)?
            else {
                break;
            };
            let Some(raw) = head else {
                break;
            };

            let cutoff = self.deps.clock.now_secs().saturating_sub(window);
            match decode_timestamp(&raw) {
                Some(oldest) if oldest > cutoff => break,
                Some(_) => {}
                None => warn!(
                    "entity {}: dropping record with undecodable timestamp {raw:?}",
                    self.entity
                ),
            }

            let popped = self.deps.store.pop_oldest_pair(pair).await;
            match self.check_store(LoopKind::Evict, "evict oldest record", popped)? {
                Some(true) => evicted += 1,
                Some(false) | None => break,
            }
        }

        if evicted > 0 {
            self.stats
                .records_evicted
                .fetch_add(evicted as u64, Ordering::Relaxed);
            debug!("entity {}: evicted {evicted} expired record(s)", self.entity);
        }
        Ok(evicted)
    }

    /// Evict until cancelled. Only an unreachable store ends the loop early.
    pub async fn run_evict_loop(&self, cancel: &CancellationToken) -> Result<(), CollectorError> {
        info!(
            "entity {}: evict loop started (every {:?}, window {}s)",
            self.entity, self.settings.cleanup_interval, self.settings.max_window_secs
        );
        while !cancel.is_cancelled() {
            self.evict_once().await?;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.cleanup_interval) => {}
            }
        }
        info!("entity {}: evict loop stopped", self.entity);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Failure accounting
    // -----------------------------------------------------------------------

    /// Count a store result. Returns `Ok(None)` for a contained failure and
    /// `Err` once unavailability reaches the configured limit.
    fn check_store<T>(
        &self,
        loop_kind: LoopKind,
        op: &str,
        result: Result<T, StoreError>,
    ) -> Result<Option<T>, CollectorError> {
        match result {
            Ok(value) => {
                self.stats
                    .consecutive_store_failures
                    .store(0, Ordering::Relaxed);
                Ok(Some(value))
            }
            Err(e) => {
                self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
                if e.is_unavailable() {
                    let failures = self
                        .stats
                        .consecutive_store_failures
                        .fetch_add(1, Ordering::Relaxed)
                        + 1;
                    if failures >= self.settings.store_failure_limit {
                        error!(
                            "entity {}: {loop_kind} loop giving up, store unreachable for {failures} consecutive operations: {e}",
                            self.entity
                        );
                        return Err(CollectorError::StoreUnavailable {
                            entity: self.entity,
                            loop_kind,
                            failures,
                            source: e,
                        });
                    }
                }
                warn!("entity {}: {op} failed: {e}", self.entity);
                Ok(None)
            }
        }
    }

    /// Snapshot of this collector's counters.
    pub fn health(&self) -> CollectorHealth {
        let s = &self.stats;
        let consecutive = s.consecutive_store_failures.load(Ordering::Relaxed);
        let polls_ok = s.polls_ok.load(Ordering::Relaxed);
        let last_poll_ok = s.last_poll_ok.load(Ordering::Relaxed);
        CollectorHealth {
            entity: self.entity,
            healthy: last_poll_ok && consecutive == 0,
            polls_ok,
            poll_failures: s.poll_failures.load(Ordering::Relaxed),
            records_appended: s.records_appended.load(Ordering::Relaxed),
            anomalies_appended: s.anomalies_appended.load(Ordering::Relaxed),
            records_evicted: s.records_evicted.load(Ordering::Relaxed),
            store_failures: s.store_failures.load(Ordering::Relaxed),
            consecutive_store_failures: consecutive,
            last_poll_at: (polls_ok > 0).then(|| s.last_poll_at.load(Ordering::Relaxed)),
        }
    }
}
