//! Cluster-coherent presence: who holds which key on which channel.
//!
//! Two set-valued keys per (channel, presence key) pair, with identical
//! TTLs refreshed by heartbeat. Add and remove must observe the
//! empty/non-empty transition atomically across both keys: the Redis
//! implementation runs the two-key scripts, the in-memory one holds a
//! single lock.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use {async_trait::async_trait, redis::AsyncCommands};

use axon_common::{Context, Error, ErrorKind, Result};

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Add a connection id under (channel, key). Returns true when this was
    /// the empty → non-empty transition for the key (a join).
    async fn add(&self, channel: &str, key: &str, conn_id: &str, ttl: Duration) -> Result<bool>;

    /// Remove a connection id. Returns true when the key's set became empty
    /// (a leave).
    async fn remove(&self, channel: &str, key: &str, conn_id: &str) -> Result<bool>;

    /// Refresh both TTLs for a held pair.
    async fn refresh(&self, channel: &str, key: &str, ttl: Duration) -> Result<()>;

    /// The distinct presence keys live on a channel, cluster-wide.
    async fn members(&self, channel: &str) -> Result<Vec<String>>;
}

// ── Redis ────────────────────────────────────────────────────────────────────

pub struct RedisPresence {
    redis: axon_redis::RedisHandle,
}

impl RedisPresence {
    pub fn new(redis: axon_redis::RedisHandle) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl PresenceStore for RedisPresence {
    async fn add(&self, channel: &str, key: &str, conn_id: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.redis.commands();
        let joined: i64 = axon_redis::scripts::presence_add()
            .key(axon_redis::keys::presence_member(channel, key))
            .key(axon_redis::keys::presence_channel(channel))
            .arg(conn_id)
            .arg(ttl.as_secs())
            .arg(key)
            .invoke_async(&mut conn)
            .await
            .context(ErrorKind::ConnectionServerError, "presence add")?;
        Ok(joined == 1)
    }

    async fn remove(&self, channel: &str, key: &str, conn_id: &str) -> Result<bool> {
        let mut conn = self.redis.commands();
        let left: i64 = axon_redis::scripts::presence_remove()
            .key(axon_redis::keys::presence_member(channel, key))
            .key(axon_redis::keys::presence_channel(channel))
            .arg(conn_id)
            .arg(key)
            .invoke_async(&mut conn)
            .await
            .context(ErrorKind::ConnectionServerError, "presence remove")?;
        Ok(left == 1)
    }

    async fn refresh(&self, channel: &str, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.redis.commands();
        let ttl_secs = ttl.as_secs() as i64;
        let mut pipe = redis::pipe();
        pipe.expire(axon_redis::keys::presence_member(channel, key), ttl_secs)
            .ignore()
            .expire(axon_redis::keys::presence_channel(channel), ttl_secs)
            .ignore();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .context(ErrorKind::ConnectionServerError, "presence refresh")?;
        Ok(())
    }

    async fn members(&self, channel: &str) -> Result<Vec<String>> {
        let mut conn = self.redis.commands();
        let members: Vec<String> = conn
            .smembers(axon_redis::keys::presence_channel(channel))
            .await
            .context(ErrorKind::ConnectionServerError, "presence members")?;
        Ok(members)
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

/// Single-process store for tests and Redis-less CLI runs. One lock covers
/// both "keys", which gives the same atomicity the scripts give Redis.
#[derive(Default)]
pub struct MemoryPresence {
    // channel → presence key → connection ids
    channels: Mutex<HashMap<String, HashMap<String, HashSet<String>>>>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresence {
    async fn add(&self, channel: &str, key: &str, conn_id: &str, _ttl: Duration) -> Result<bool> {
        let mut channels = self.channels.lock().map_err(|_| poisoned())?;
        let keys = channels.entry(channel.to_string()).or_default();
        let conns = keys.entry(key.to_string()).or_default();
        let was_empty = conns.is_empty();
        conns.insert(conn_id.to_string());
        Ok(was_empty)
    }

    async fn remove(&self, channel: &str, key: &str, conn_id: &str) -> Result<bool> {
        let mut channels = self.channels.lock().map_err(|_| poisoned())?;
        let Some(keys) = channels.get_mut(channel) else {
            return Ok(false);
        };
        let Some(conns) = keys.get_mut(key) else {
            return Ok(false);
        };
        conns.remove(conn_id);
        if conns.is_empty() {
            keys.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn refresh(&self, _channel: &str, _key: &str, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn members(&self, channel: &str) -> Result<Vec<String>> {
        let channels = self.channels.lock().map_err(|_| poisoned())?;
        Ok(channels
            .get(channel)
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default())
    }
}

fn poisoned() -> Error {
    Error::new(ErrorKind::ConnectionServerError, "presence store poisoned")
}
