//! Sample store boundary.
//!
//! The store is an ordered, per-key list service: push at the newest end, pop
//! and peek at the oldest end, range reads by index. Every entity owns four
//! lists (two data/timestamp pairs) plus a profile value:
//!
//! ```text
//! {id}_data                ─┐ readings window     (trimmed by eviction)
//! {id}_timestamp           ─┘
//! {id}_anomaly_data        ─┐ anomaly log         (append-only)
//! {id}_anomaly_timestamp   ─┘
//! {id}_profile                latest profile      (overwritten)
//! ```
//!
//! Each pair must stay equal in length and index-aligned, so writes and trims
//! go through [`SampleStore::push_newest_pair`] and
//! [`SampleStore::pop_oldest_pair`]. Backends that can do so apply both halves
//! atomically.

mod memory;
mod redis_store;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use crate::error::StoreError;
use crate::model::EntityId;

/// A data list and its parallel timestamp list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencePair {
    pub data: String,
    pub timestamps: String,
}

/// All store keys owned by one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKeys {
    pub readings: SequencePair,
    pub anomalies: SequencePair,
    pub profile: String,
}

impl EntityKeys {
    pub fn for_entity(id: EntityId) -> Self {
        let base = format!("{id}_");
        Self {
            readings: SequencePair {
                data: format!("{base}data"),
                timestamps: format!("{base}timestamp"),
            },
            anomalies: SequencePair {
                data: format!("{base}anomaly_data"),
                timestamps: format!("{base}anomaly_timestamp"),
            },
            profile: format!("{base}profile"),
        }
    }
}

/// Keyed ordered-sequence store.
///
/// Single operations must be individually atomic. `range` follows Redis
/// `LRANGE` semantics: inclusive bounds, negative indices count from the end.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Backend name for logs.
    fn backend(&self) -> &'static str;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn push_newest(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn pop_oldest(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn peek_oldest(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn range(&self, key: &str, start: isize, end: isize)
    -> Result<Vec<String>, StoreError>;

    async fn len(&self, key: &str) -> Result<usize, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Append one logical record (value + timestamp) at the newest end.
    ///
    /// The default composes two pushes and is not atomic.
    async fn push_newest_pair(
        &self,
        pair: &SequencePair,
        value: &str,
        timestamp: &str,
    ) -> Result<(), StoreError> {
        self.push_newest(&pair.data, value).await?;
        self.push_newest(&pair.timestamps, timestamp).await
    }

    /// Remove the oldest logical record. Returns `false` if both lists were empty.
    ///
    /// The default composes two pops and is not atomic.
    async fn pop_oldest_pair(&self, pair: &SequencePair) -> Result<bool, StoreError> {
        let data = self.pop_oldest(&pair.data).await?;
        let ts = self.pop_oldest(&pair.timestamps).await?;
        Ok(data.is_some() || ts.is_some())
    }
}

/// Open a store from a URL.
///
/// - `memory://`: process-local store, for dry runs and tests
/// - `redis://`, `rediss://`, `redis+unix://`: Redis
pub async fn connect_store(url: &str) -> Result<Arc<dyn SampleStore>, StoreError> {
    let scheme = url.split("://").next().unwrap_or_default();
    match scheme {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "redis" | "rediss" | "redis+unix" | "unix" => {
            Ok(Arc::new(RedisStore::connect(url).await?))
        }
        _ => Err(StoreError::UnsupportedUrl(url.to_string())),
    }
}
