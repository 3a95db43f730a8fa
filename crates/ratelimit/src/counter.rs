use std::{collections::HashMap, sync::Mutex, time::Duration};

use {async_trait::async_trait, redis::AsyncCommands};

use axon_common::{Context, Error, ErrorKind, Result};

/// The two-counter primitive the sliding window is computed from.
///
/// One call increments the current window's counter (setting its TTL) and
/// reads the previous window's, in a single pipeline so the pair is one
/// round-trip.
#[async_trait]
pub trait RateCounter: Send + Sync {
    /// Returns (current count after increment, previous window count).
    async fn bump(&self, prefix: &str, identifier: &str, window: u64, ttl: Duration)
    -> Result<(u64, u64)>;
}

// ── Redis ────────────────────────────────────────────────────────────────────

pub struct RedisCounter {
    redis: axon_redis::RedisHandle,
}

impl RedisCounter {
    pub fn new(redis: axon_redis::RedisHandle) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl RateCounter for RedisCounter {
    async fn bump(
        &self,
        prefix: &str,
        identifier: &str,
        window: u64,
        ttl: Duration,
    ) -> Result<(u64, u64)> {
        let current_key = axon_redis::keys::rate_window(prefix, identifier, window);
        let previous_key =
            axon_redis::keys::rate_window(prefix, identifier, window.saturating_sub(1));
        let mut conn = self.redis.commands();

        let mut pipe = redis::pipe();
        pipe.incr(&current_key, 1u64)
            .expire(&current_key, ttl.as_secs() as i64)
            .ignore()
            .get(&previous_key);
        let (current, previous): (u64, Option<u64>) = pipe
            .query_async(&mut conn)
            .await
            .context(ErrorKind::ConnectionServerError, "rate counter bump")?;
        Ok((current, previous.unwrap_or(0)))
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCounter {
    counts: Mutex<HashMap<(String, u64), u64>>,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateCounter for MemoryCounter {
    async fn bump(
        &self,
        prefix: &str,
        identifier: &str,
        window: u64,
        _ttl: Duration,
    ) -> Result<(u64, u64)> {
        let mut counts = self
            .counts
            .lock()
            .map_err(|_| Error::new(ErrorKind::ConnectionServerError, "rate counter poisoned"))?;
        let key = (format!("{prefix}:{identifier}"), window);
        let current = counts.entry(key.clone()).or_insert(0);
        *current += 1;
        let current = *current;
        let previous = counts
            .get(&(key.0, window.saturating_sub(1)))
            .copied()
            .unwrap_or(0);
        Ok((current, previous))
    }
}
