use {
    redis::aio::ConnectionManager,
    tracing::{debug, info},
};

use axon_common::{Context, ErrorKind, Result};

/// The process-wide Redis handle: a multiplexed command connection plus the
/// client needed to open the dedicated subscriber connection.
///
/// Two connections per process (commands and pub/sub), because a Redis
/// connection in subscribe mode cannot issue regular commands.
#[derive(Clone)]
pub struct RedisHandle {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisHandle {
    pub async fn connect(url: &str) -> Result<Self> {
        debug!(url, "connecting to redis");
        let client = redis::Client::open(url)
            .context(ErrorKind::ServerInitialization, "invalid redis url")?;
        let manager = client
            .get_connection_manager()
            .await
            .context(ErrorKind::ServerInitialization, "redis connect")?;
        info!(url, "redis connected");
        Ok(Self { client, manager })
    }

    /// The shared command connection. Cloning is cheap and safe under
    /// concurrency; the manager reconnects transparently.
    pub fn commands(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Open the dedicated subscriber connection.
    pub async fn subscriber(&self) -> Result<redis::aio::PubSub> {
        self.client
            .get_async_pubsub()
            .await
            .context(ErrorKind::ServerInitialization, "redis subscriber connect")
    }
}
