//! Redis-backed counter store.
//!
//! Counters survive restarts and are shared across replicas.
//! `ConnectionManager` reconnects on its own, so a transient broker outage
//! surfaces as per-call errors that the guard degrades around.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use super::CounterStore;

#[derive(Clone)]
pub struct RedisCounterStore {
    manager: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect to the broker at `url` (`redis://...`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut conn = self.manager.clone();
        let count: u64 = conn.incr(key, 1).await.context("redis INCR failed")?;
        // The window starts when the key is created.
        if count == 1 {
            conn.expire::<_, ()>(key, ttl.as_secs() as i64)
                .await
                .context("redis EXPIRE failed")?;
        }
        Ok(count)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .context("redis SETEX failed")
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.context("redis GET failed")
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        conn.exists(key).await.context("redis EXISTS failed")
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await.context("redis DEL failed")
    }
}
