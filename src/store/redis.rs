//! Redis store.
//!
//! Maps the store primitives onto Redis list and hash commands:
//! BRPOPLPUSH, LPUSH, LREM, LRANGE, LLEN, HSET, HGETALL, DEL.
//!
//! Blocking moves run on their own connection. A multiplexed connection
//! serializes commands, so a BRPOPLPUSH waiting on an empty list would
//! otherwise hold up every push and removal issued meanwhile.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::error::{Error, Result};

use super::Store;

/// Shortest blocking move sent to Redis.
const MIN_BLOCK_SECS: f64 = 0.01;

/// Store handle. Both connection managers reconnect automatically.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    blocking: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis (e.g. "redis://localhost:6379").
    pub async fn connect(url: &SecretString) -> Result<Self> {
        let client = redis::Client::open(url.expose_secret())
            .map_err(|e| Error::StoreUnavailable(format!("invalid redis url: {e}")))?;

        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        let blocking = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        debug!("redis store connected");
        Ok(Self { conn, blocking })
    }

    /// Simple health check: PING.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn atomic_move(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let mut conn = self.blocking.clone();
        // Fractional seconds need Redis 6. Zero means "block forever" to Redis.
        let timeout_secs = timeout.as_secs_f64().max(MIN_BLOCK_SECS);

        let moved: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(src)
            .arg(dst)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;
        Ok(moved)
    }

    async fn push_head(&self, seq: &str, blob: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(seq, blob).await?;
        Ok(())
    }

    async fn remove_one(&self, seq: &str, blob: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.lrem(seq, 1, blob).await?;
        Ok(removed)
    }

    async fn range(&self, seq: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let entries: Vec<String> = conn.lrange(seq, 0, -1).await?;
        Ok(entries)
    }

    async fn len(&self, seq: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(seq).await?;
        Ok(len)
    }

    async fn map_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn map_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }

    async fn map_delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}
