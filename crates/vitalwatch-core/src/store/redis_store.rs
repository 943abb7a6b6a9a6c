//! Redis store backend.
//!
//! Lists grow at the tail (`RPUSH`) and are trimmed from the head (`LPOP`),
//! so index 0 is always the oldest record. Pair operations run as a
//! `MULTI`/`EXEC` pipeline.

use std::time::Duration;

use async_trait::async_trait;
use log::info;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, RedisError};

use super::{SampleStore, SequencePair};
use crate::error::StoreError;

/// Bound on establishing one connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Bound on a single command round trip.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);
/// Reconnect attempts per failed command before it reports `Unavailable`.
const RECONNECT_RETRIES: usize = 2;
/// Cap on the reconnect backoff, in milliseconds.
const RECONNECT_MAX_DELAY_MS: u64 = 500;

/// Redis-backed store over an auto-reconnecting multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url`. Fails with [`StoreError::Unavailable`] within a
    /// couple of seconds if the server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::UnsupportedUrl(format!("{url}: {e}")))?;

        // One direct attempt first; the manager would otherwise back off and retry.
        tokio::time::timeout(CONNECT_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!(
                    "{url}: no connection after {}ms",
                    CONNECT_TIMEOUT.as_millis()
                ))
            })?
            .map_err(map_redis_error)?;

        let manager = ConnectionManager::new_with_config(client, manager_config())
            .await
            .map_err(map_redis_error)?;
        info!("connected to redis at {url}");
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

/// Short, bounded reconnects so an outage surfaces as `Unavailable` per command.
fn manager_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_number_of_retries(RECONNECT_RETRIES)
        .set_max_delay(RECONNECT_MAX_DELAY_MS)
        .set_connection_timeout(CONNECT_TIMEOUT)
        .set_response_timeout(RESPONSE_TIMEOUT)
}

/// Split Redis failures into "cannot reach the server" and "this command failed".
fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Command(err.to_string())
    }
}

#[async_trait]
impl SampleStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut con = self.conn();
        let _: String = redis::cmd("PING")
            .query_async(&mut con)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn push_newest(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut con = self.conn();
        let _: usize = con.rpush(key, value).await.map_err(map_redis_error)?;
        Ok(())
    }

    async fn pop_oldest(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut con = self.conn();
        con.lpop(key, None).await.map_err(map_redis_error)
    }

    async fn peek_oldest(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut con = self.conn();
        let head: Vec<String> = con.lrange(key, 0, 0).await.map_err(map_redis_error)?;
        Ok(head.into_iter().next())
    }

    async fn range(
        &self,
        key: &str,
        start: isize,
        end: isize,
    ) -> Result<Vec<String>, StoreError> {
        let mut con = self.conn();
        con.lrange(key, start, end).await.map_err(map_redis_error)
    }

    async fn len(&self, key: &str) -> Result<usize, StoreError> {
        let mut con = self.conn();
        con.llen(key).await.map_err(map_redis_error)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut con = self.conn();
        let _: () = con.set(key, value).await.map_err(map_redis_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut con = self.conn();
        con.get(key).await.map_err(map_redis_error)
    }

    async fn push_newest_pair(
        &self,
        pair: &SequencePair,
        value: &str,
        timestamp: &str,
    ) -> Result<(), StoreError> {
        let mut con = self.conn();
        let _: () = redis::pipe()
            .atomic()
            .rpush(&pair.data, value)
            .ignore()
            .rpush(&pair.timestamps, timestamp)
            .ignore()
            .query_async(&mut con)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn pop_oldest_pair(&self, pair: &SequencePair) -> Result<bool, StoreError> {
        let mut con = self.conn();
        let (data, ts): (Option<String>, Option<String>) = redis::pipe()
            .atomic()
            .lpop(&pair.data, None)
            .lpop(&pair.timestamps, None)
            .query_async(&mut con)
            .await
            .map_err(map_redis_error)?;
        Ok(data.is_some() || ts.is_some())
    }
}
