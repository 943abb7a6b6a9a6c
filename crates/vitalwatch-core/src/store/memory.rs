//! Process-local store backend.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{SampleStore, SequencePair};
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    values: HashMap<String, String>,
}

/// In-memory list store. Pair operations take one lock and are atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while set, every operation fails with
    /// [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Resolve Redis-style inclusive, possibly negative bounds against a length.
fn resolve_range(len: usize, start: isize, end: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if len == 0 || start > end || start >= len {
        return None;
    }
    Some((start as usize, end as usize))
}

#[async_trait]
impl SampleStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn push_newest(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn pop_oldest(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.lock()?;
        Ok(inner.lists.get_mut(key).and_then(VecDeque::pop_front))
    }

    async fn peek_oldest(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.lists.get(key).and_then(|l| l.front().cloned()))
    }

    async fn range(
        &self,
        key: &str,
        start: isize,
        end: isize,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.lock()?;
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(list.len(), start, end) {
            Some((lo, hi)) => list.range(lo..=hi).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn len(&self, key: &str) -> Result<usize, StoreError> {
        let inner = self.lock()?;
        Ok(inner.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.values.get(key).cloned())
    }

    async fn push_newest_pair(
        &self,
        pair: &SequencePair,
        value: &str,
        timestamp: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner
            .lists
            .entry(pair.data.clone())
            .or_default()
            .push_back(value.to_string());
        inner
            .lists
            .entry(pair.timestamps.clone())
            .or_default()
            .push_back(timestamp.to_string());
        Ok(())
    }

    async fn pop_oldest_pair(&self, pair: &SequencePair) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let data = inner.lists.get_mut(&pair.data).and_then(VecDeque::pop_front);
        let ts = inner
            .lists
            .get_mut(&pair.timestamps)
            .and_then(VecDeque::pop_front);
        Ok(data.is_some() || ts.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> SequencePair {
        SequencePair {
            data: "1_data".into(),
            timestamps: "1_timestamp".into(),
        }
    }

    // -----------------------------------------------------------------------
    // Range resolution
    // -----------------------------------------------------------------------

    #[test]
    fn test_resolve_range_redis_semantics() {
        assert_eq!(resolve_range(5, 0, -1), Some((0, 4)));
        assert_eq!(resolve_range(5, 0, 0), Some((0, 0)));
        assert_eq!(resolve_range(5, -2, -1), Some((3, 4)));
        assert_eq!(resolve_range(5, 1, 100), Some((1, 4)));
        assert_eq!(resolve_range(5, -100, 1), Some((0, 1)));
        assert_eq!(resolve_range(5, 3, 1), None);
        assert_eq!(resolve_range(5, 7, 9), None);
        assert_eq!(resolve_range(0, 0, -1), None);
    }

    // -----------------------------------------------------------------------
    // List operations
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_push_newest_pop_oldest_is_fifo() {
        let store = MemoryStore::new();
        store.push_newest("k", "a").await.unwrap();
        store.push_newest("k", "b").await.unwrap();
        store.push_newest("k", "c").await.unwrap();
        assert_eq!(store.peek_oldest("k").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.pop_oldest("k").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.range("k", 0, -1).await.unwrap(), vec!["b", "c"]);
        assert_eq!(store.len("k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_key_reads() {
        let store = MemoryStore::new();
        assert_eq!(store.peek_oldest("missing").await.unwrap(), None);
        assert_eq!(store.pop_oldest("missing").await.unwrap(), None);
        assert!(store.range("missing", 0, -1).await.unwrap().is_empty());
        assert_eq!(store.len("missing").await.unwrap(), 0);
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pair_operations_keep_lengths_equal() {
        let store = MemoryStore::new();
        let p = pair();
        store.push_newest_pair(&p, "[]", "10").await.unwrap();
        store.push_newest_pair(&p, "[]", "20").await.unwrap();
        assert_eq!(store.len(&p.data).await.unwrap(), 2);
        assert_eq!(store.len(&p.timestamps).await.unwrap(), 2);

        assert!(store.pop_oldest_pair(&p).await.unwrap());
        assert_eq!(store.range(&p.timestamps, 0, -1).await.unwrap(), vec!["20"]);
        assert!(store.pop_oldest_pair(&p).await.unwrap());
        assert!(!store.pop_oldest_pair(&p).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = MemoryStore::new();
        store.set("p", "one").await.unwrap();
        store.set("p", "two").await.unwrap();
        assert_eq!(store.get("p").await.unwrap().as_deref(), Some("two"));
    }

    // -----------------------------------------------------------------------
    // Outage simulation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_offline_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.push_newest("k", "a").await.unwrap();
        store.set_offline(true);
        let err = store.ping().await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(store.pop_oldest("k").await.unwrap_err().is_unavailable());

        store.set_offline(false);
        assert_eq!(store.len("k").await.unwrap(), 1);
    }
}
