use std::sync::Arc;

use async_trait::async_trait;

use {
    axon_actions::{ActionMiddleware, Params},
    axon_common::{Error, ErrorKind, Result},
    axon_connection::Connection,
};

use crate::limiter::RateLimiter;

pub const NAME: &str = "rate-limit";

/// Action middleware form of the limiter: stores the verdict on the
/// connection (the HTTP layer reads it for `X-RateLimit-*` headers) and
/// rejects the dispatch when the window is exhausted.
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl ActionMiddleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        NAME
    }

    async fn run_before(
        &self,
        _params: &Params,
        conn: &Arc<Connection>,
    ) -> Result<Option<Params>> {
        if !self.limiter.config().enabled {
            return Ok(None);
        }
        let info = self.limiter.check_connection(conn).await?;
        let limited = info.retry_after.is_some();
        conn.set_rate_limit(info).await;
        if limited {
            return Err(Error::new(
                ErrorKind::ConnectionRateLimited,
                "rate limit exceeded",
            ));
        }
        Ok(None)
    }
}
