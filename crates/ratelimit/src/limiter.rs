use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::debug;

use {
    axon_common::Result,
    axon_config::RateLimitConfig,
    axon_connection::{Connection, RateLimitInfo},
};

use crate::counter::RateCounter;

/// Sliding-window limiter over two adjacent counters.
///
/// The estimate interpolates the previous window by how far through the
/// current window we are: `floor(prev × (1 − progress)) + current`.
pub struct RateLimiter {
    counter: Arc<dyn RateCounter>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(counter: Arc<dyn RateCounter>, config: RateLimitConfig) -> Self {
        Self { counter, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check a connection: keyed by user id when a session carries one,
    /// else by remote identifier, with the matching limit.
    pub async fn check_connection(&self, conn: &Connection) -> Result<RateLimitInfo> {
        let (key, limit) = match conn.user_id().await {
            Some(user_id) => (format!("user:{user_id}"), self.config.authenticated_limit),
            None => (
                format!("ip:{}", conn.identifier),
                self.config.unauthenticated_limit,
            ),
        };
        self.check(&key, limit).await
    }

    /// Check one identifier against one limit, using the configured window.
    pub async fn check(&self, key: &str, limit: u64) -> Result<RateLimitInfo> {
        self.check_windowed(key, limit, self.config.window_ms, now_ms())
            .await
    }

    /// Check against an override limit and window (the OAuth mutable-path
    /// overrides come through here).
    pub async fn check_with(&self, key: &str, limit: u64, window_ms: u64) -> Result<RateLimitInfo> {
        self.check_windowed(key, limit, window_ms, now_ms()).await
    }

    /// Check with an explicit window and clock; the OAuth register
    /// override and the tests come through here.
    pub async fn check_windowed(
        &self,
        key: &str,
        limit: u64,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<RateLimitInfo> {
        let window = now_ms / window_ms;
        let elapsed = now_ms % window_ms;
        let ttl = Duration::from_millis(window_ms * 2);

        let (current, previous) = self
            .counter
            .bump(&self.config.key_prefix, key, window, ttl)
            .await?;

        let progress = elapsed as f64 / window_ms as f64;
        let estimate = (previous as f64 * (1.0 - progress)).floor() as u64 + current;

        let info = if estimate > limit {
            let retry_after = (window_ms - elapsed).div_ceil(1000);
            debug!(key, estimate, limit, retry_after, "rate limited");
            RateLimitInfo {
                limit,
                remaining: 0,
                reset_at: ((window + 1) * window_ms).div_ceil(1000),
                retry_after: Some(retry_after.max(1)),
            }
        } else {
            RateLimitInfo {
                limit,
                remaining: limit.saturating_sub(estimate),
                reset_at: ((window + 1) * window_ms).div_ceil(1000),
                retry_after: None,
            }
        };
        Ok(info)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
