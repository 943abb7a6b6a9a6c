//! Read-side access to the retained window and anomaly log.
//!
//! Readers never write. Data and timestamp lists are paired by index; when a
//! reader races a writer and the two lengths differ, the pair is truncated to
//! the shorter length.

use std::sync::Arc;

use log::warn;
use serde::Serialize;

use crate::error::StoreError;
use crate::model::{EntityId, EntityProfile, Snapshot, TimestampedRecord, decode_timestamp};
use crate::store::{EntityKeys, SampleStore, SequencePair};

/// Lengths and bounds of one entity's sequences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowStats {
    pub entity: EntityId,
    pub readings_data: usize,
    pub readings_timestamps: usize,
    pub anomaly_data: usize,
    pub anomaly_timestamps: usize,
    /// Oldest retained reading, Unix seconds.
    pub oldest_at: Option<i64>,
    /// Newest retained reading, Unix seconds.
    pub newest_at: Option<i64>,
}

impl WindowStats {
    /// Both data/timestamp pairs have equal lengths.
    pub fn is_paired(&self) -> bool {
        self.readings_data == self.readings_timestamps
            && self.anomaly_data == self.anomaly_timestamps
    }
}

/// Read-only view over the per-entity keys of a [`SampleStore`].
#[derive(Clone)]
pub struct WindowReader {
    store: Arc<dyn SampleStore>,
}

impl WindowReader {
    pub fn new(store: Arc<dyn SampleStore>) -> Self {
        Self { store }
    }

    /// The retained readings window, oldest first.
    pub async fn readings(&self, entity: EntityId) -> Result<Vec<TimestampedRecord>, StoreError> {
        self.records(&EntityKeys::for_entity(entity).readings).await
    }

    /// The full anomaly log, oldest first.
    pub async fn anomalies(&self, entity: EntityId) -> Result<Vec<TimestampedRecord>, StoreError> {
        self.records(&EntityKeys::for_entity(entity).anomalies).await
    }

    /// `(collected_at, value)` for one channel across the readings window.
    pub async fn channel_series(
        &self,
        entity: EntityId,
        channel: usize,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        Ok(self
            .readings(entity)
            .await?
            .into_iter()
            .filter_map(|r| r.snapshot.value(channel).map(|v| (r.collected_at, v)))
            .collect())
    }

    /// The last profile written for the entity.
    pub async fn profile(&self, entity: EntityId) -> Result<Option<EntityProfile>, StoreError> {
        let key = EntityKeys::for_entity(entity).profile;
        match self.store.get(&key).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key,
                    reason: e.to_string(),
                }),
        }
    }

    pub async fn window_stats(&self, entity: EntityId) -> Result<WindowStats, StoreError> {
        let keys = EntityKeys::for_entity(entity);
        let oldest = self.store.peek_oldest(&keys.readings.timestamps).await?;
        let newest = self.store.range(&keys.readings.timestamps, -1, -1).await?;
        Ok(WindowStats {
            entity,
            readings_data: self.store.len(&keys.readings.data).await?,
            readings_timestamps: self.store.len(&keys.readings.timestamps).await?,
            anomaly_data: self.store.len(&keys.anomalies.data).await?,
            anomaly_timestamps: self.store.len(&keys.anomalies.timestamps).await?,
            oldest_at: oldest.as_deref().and_then(decode_timestamp),
            newest_at: newest.first().and_then(|raw| decode_timestamp(raw)),
        })
    }

    async fn records(&self, pair: &SequencePair) -> Result<Vec<TimestampedRecord>, StoreError> {
        let data = self.store.range(&pair.data, 0, -1).await?;
        let timestamps = self.store.range(&pair.timestamps, 0, -1).await?;
        if data.len() != timestamps.len() {
            warn!(
                "{}: {} data entries vs {} timestamps, truncating",
                pair.data,
                data.len(),
                timestamps.len()
            );
        }

        let mut records = Vec::with_capacity(data.len().min(timestamps.len()));
        for (index, (raw, ts)) in data.iter().zip(&timestamps).enumerate() {
            let Some(collected_at) = decode_timestamp(ts) else {
                warn!("{}[{index}]: skipping undecodable timestamp {ts:?}", pair.timestamps);
                continue;
            };
            match Snapshot::decode(raw) {
                Ok(snapshot) => records.push(TimestampedRecord {
                    snapshot,
                    collected_at,
                }),
                Err(e) => warn!("{}[{index}]: skipping undecodable snapshot: {e}", pair.data),
            }
        }
        Ok(records)
    }
}
