//! Fleet supervisor: one collector per configured entity, all loops concurrent.
//!
//! The fleet owns the entity list for its lifetime. It pings the store once at
//! startup, spawns a poll loop and an evict loop per entity, and waits. A fatal
//! collector error cancels every other loop and is returned to the caller;
//! recoverable per-cycle errors never leave their collector.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::{error, info};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::classifier::build_classifier;
use crate::clock::Clock;
use crate::collector::{Collector, CollectorDeps, CollectorHealth};
use crate::config::VitalwatchConfig;
use crate::error::{FleetError, LoopKind};
use crate::model::EntityId;
use crate::store::SampleStore;
use crate::upstream::Upstream;

pub struct Fleet {
    collectors: Vec<Arc<Collector>>,
    deps: CollectorDeps,
    cancel: CancellationToken,
}

impl Fleet {
    /// Build a fleet from a validated configuration and explicit collaborators.
    pub fn new(config: &VitalwatchConfig, deps: CollectorDeps) -> Result<Self, FleetError> {
        config.validate()?;
        let settings = config.collector_settings();
        let collectors = config
            .entity_ids
            .iter()
            .map(|&id| Arc::new(Collector::new(id, deps.clone(), settings)))
            .collect();
        Ok(Self {
            collectors,
            deps,
            cancel: CancellationToken::new(),
        })
    }

    /// Build a fleet with the classifier selected by `config.classifier`.
    pub fn from_config(
        config: &VitalwatchConfig,
        store: Arc<dyn SampleStore>,
        upstream: Arc<dyn Upstream>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, FleetError> {
        let classifier = Arc::from(build_classifier(config.classifier, config.anomaly_rate));
        Self::new(
            config,
            CollectorDeps {
                store,
                upstream,
                classifier,
                clock,
            },
        )
    }

    /// Token that stops every loop at its next suspension point.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.collectors.iter().map(|c| c.entity()).collect()
    }

    pub fn report(&self) -> FleetReport {
        let entities: Vec<CollectorHealth> = self.collectors.iter().map(|c| c.health()).collect();
        FleetReport {
            healthy: entities.iter().filter(|h| h.healthy).count(),
            total: entities.len(),
            entities,
        }
    }

    /// Run all loops until cancellation or the first fatal collector error.
    pub async fn run(&self) -> Result<FleetReport, FleetError> {
        self.deps
            .store
            .ping()
            .await
            .map_err(FleetError::StoreUnreachable)?;

        info!(
            "fleet: starting {} collector(s) ({} loops), classifier {}, store {}",
            self.collectors.len(),
            self.collectors.len() * 2,
            self.deps.classifier.name(),
            self.deps.store.backend()
        );

        let mut tasks = JoinSet::new();
        let mut owners = HashMap::new();
        for collector in &self.collectors {
            let entity = collector.entity();
            for loop_kind in [LoopKind::Poll, LoopKind::Evict] {
                let collector = Arc::clone(collector);
                let cancel = self.cancel.clone();
                let handle = tasks.spawn(async move {
                    match loop_kind {
                        LoopKind::Poll => collector.run_poll_loop(&cancel).await,
                        LoopKind::Evict => collector.run_evict_loop(&cancel).await,
                    }
                });
                owners.insert(handle.id(), entity);
            }
        }

        let mut first_error: Option<FleetError> = None;
        while let Some(joined) = tasks.join_next_with_id().await {
            let failure = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((_, Err(e))) => FleetError::from(e),
                Err(e) => match owners.get(&e.id()) {
                    Some(&entity) => FleetError::Join {
                        entity,
                        reason: e.to_string(),
                    },
                    None => continue,
                },
            };
            if first_error.is_none() {
                error!("fleet: {failure}; stopping all collectors");
                self.cancel.cancel();
                first_error = Some(failure);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("fleet: all collectors stopped");
                Ok(self.report())
            }
        }
    }
}

/// Aggregated collector health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FleetReport {
    pub healthy: usize,
    pub total: usize,
    pub entities: Vec<CollectorHealth>,
}

impl FleetReport {
    /// One-line summary for periodic logging.
    pub fn summary(&self) -> String {
        let sum = |f: fn(&CollectorHealth) -> u64| self.entities.iter().map(f).sum::<u64>();
        format!(
            "{}/{} entities healthy, {} appended, {} anomalies, {} evicted, {} poll failures, {} store failures",
            self.healthy,
            self.total,
            sum(|h| h.records_appended),
            sum(|h| h.anomalies_appended),
            sum(|h| h.records_evicted),
            sum(|h| h.poll_failures),
            sum(|h| h.store_failures),
        )
    }
}

impl fmt::Display for FleetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "VITALWATCH FLEET REPORT")?;
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "Entities: {}/{} healthy", self.healthy, self.total)?;
        writeln!(
            f,
            "\n{:<8} {:>4} {:>9} {:>8} {:>8} {:>8} {:>8}",
            "Entity", "OK", "Appended", "Anomaly", "Evicted", "PollErr", "StoreErr"
        )?;
        writeln!(f, "{}", "-".repeat(60))?;
        for h in &self.entities {
            let ok = if h.healthy { "✓" } else { "✗" };
            writeln!(
                f,
                "{:<8} {:>4} {:>9} {:>8} {:>8} {:>8} {:>8}",
                h.entity,
                ok,
                h.records_appended,
                h.anomalies_appended,
                h.records_evicted,
                h.poll_failures,
                h.store_failures
            )?;
        }
        Ok(())
    }
}
