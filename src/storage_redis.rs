#[cfg(feature = "redis")]
use async_trait::async_trait;
#[cfg(feature = "redis")]
use redis::AsyncCommands;
#[cfg(feature = "redis")]
use std::collections::HashMap;
#[cfg(feature = "redis")]
use std::time::Duration;

#[cfg(feature = "redis")]
use crate::config::DispatchConfig;
#[cfg(feature = "redis")]
use crate::error::StoreError;
#[cfg(feature = "redis")]
use crate::storage::{Store, StoreResult};

/// Redis-backed shared store.
///
/// Every primitive maps onto a single Redis command (or a `MULTI` pair for
/// the capped list push), so atomicity comes from Redis itself.
#[cfg(feature = "redis")]
pub struct RedisStore {
    client: redis::Client,
}

#[cfg(feature = "redis")]
impl RedisStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn open(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(backend)?;
        Ok(Self::new(client))
    }

    /// Opens the store at `config.redis_url`. No connection is made until
    /// the first command.
    pub fn from_config(config: &DispatchConfig) -> StoreResult<Self> {
        Self::open(&config.redis_url)
    }

    async fn conn(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(backend)
    }
}

#[cfg(feature = "redis")]
fn backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[cfg(feature = "redis")]
#[async_trait]
impl Store for RedisStore {
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let added: i64 = conn.sadd(key, member).await.map_err(backend)?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.srem(key, member).await.map_err(backend)?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.smembers(key).await.map_err(backend)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn().await?;
        conn.incr(key, 1).await.map_err(backend)
    }

    async fn set_expiring(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let millis = ttl.as_millis().max(1) as u64;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(backend)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.del(key).await.map_err(backend)?;
        Ok(())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.hset(key, field, value).await.map_err(backend)?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.hget(key, field).await.map_err(backend)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.hdel(key, field).await.map_err(backend)?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        conn.hgetall(key).await.map_err(backend)
    }

    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> StoreResult<i64> {
        let mut conn = self.conn().await?;
        conn.hincr(key, field, by).await.map_err(backend)
    }

    async fn list_push_capped(&self, key: &str, value: &str, cap: usize) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let stop = cap.max(1) as isize - 1;
        redis::pipe()
            .atomic()
            .lpush(key, value)
            .ignore()
            .ltrim(key, 0, stop)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend)
    }

    async fn list_range(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.lrange(key, 0, -1).await.map_err(backend)
    }

    async fn list_remove(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.lrem(key, 1, value).await.map_err(backend)?;
        Ok(())
    }
}
