use std::{any::Any, sync::Arc};

use {
    async_trait::async_trait,
    tokio::sync::Mutex,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use {
    axon_common::{Context, Error, ErrorKind, Result},
    axon_config::ChannelsConfig,
    axon_connection::ConnectionMap,
    axon_redis::RedisHandle,
    axon_registry::{Api, Component, RunMode},
};

use crate::{
    channel::ChannelRegistry,
    presence::{MemoryPresence, PresenceStore, RedisPresence},
    pubsub::{LocalBus, PubSubBus, RedisBus},
    service::Channels,
};

pub const NAMESPACE: &str = "channels";

/// Builds the fabric at initialize (Redis-backed when a Redis handle is in
/// the namespace, in-process otherwise), then runs the fan-out bridge and
/// the presence heartbeat for the life of the server.
pub struct ChannelsComponent {
    defs: Mutex<Option<ChannelRegistry>>,
    config: ChannelsConfig,
    bus_channel: String,
    connections: Arc<ConnectionMap>,
    built: Mutex<Option<Arc<Channels>>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl ChannelsComponent {
    pub fn new(
        defs: ChannelRegistry,
        config: ChannelsConfig,
        bus_channel: impl Into<String>,
        connections: Arc<ConnectionMap>,
    ) -> Self {
        Self {
            defs: Mutex::new(Some(defs)),
            config,
            bus_channel: bus_channel.into(),
            connections,
            built: Mutex::new(None),
            cancel: Mutex::new(None),
        }
    }

    /// Sanity check against a heartbeat outpacing its own TTL.
    fn validate_liveness(&self) -> Result<()> {
        if self.config.presence_ttl_secs < self.config.presence_heartbeat_secs * 2 {
            return Err(Error::new(
                ErrorKind::InitializerValidation,
                "presence_ttl_secs must be at least twice presence_heartbeat_secs",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Component for ChannelsComponent {
    fn name(&self) -> &str {
        NAMESPACE
    }

    fn load_priority(&self) -> i32 {
        400
    }

    fn start_priority(&self) -> i32 {
        400
    }

    fn stop_priority(&self) -> i32 {
        400
    }

    fn run_modes(&self) -> &[RunMode] {
        &[RunMode::Server]
    }

    async fn initialize(&self, api: &Api) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        let defs = self
            .defs
            .lock()
            .await
            .take()
            .context(ErrorKind::ServerInitialization, "channels already initialized")?;
        self.validate_liveness()?;

        let (presence, bus): (Arc<dyn PresenceStore>, Arc<dyn PubSubBus>) =
            match api.get::<RedisHandle>(axon_redis::NAMESPACE) {
                Some(redis) => (
                    Arc::new(RedisPresence::new((*redis).clone())),
                    Arc::new(RedisBus::new((*redis).clone(), self.bus_channel.clone())),
                ),
                None => {
                    debug!("no redis in namespace, channels run in-process");
                    (Arc::new(MemoryPresence::new()), Arc::new(LocalBus::new()))
                },
            };

        let channels = Arc::new(Channels::new(
            defs,
            presence,
            bus,
            Arc::clone(&self.connections),
            self.config.clone(),
        ));
        *self.built.lock().await = Some(Arc::clone(&channels));
        Ok(Some(channels as Arc<dyn Any + Send + Sync>))
    }

    async fn start(&self, _api: &Api, _mode: RunMode) -> Result<()> {
        let Some(channels) = self.built.lock().await.clone() else {
            return Err(Error::new(
                ErrorKind::ServerStart,
                "channels not initialized",
            ));
        };
        let cancel = CancellationToken::new();

        let fanout = Arc::clone(&channels);
        let fanout_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = fanout.run_fanout(fanout_cancel).await {
                warn!(error = %e, "pub/sub fan-out stopped");
            }
        });

        let heartbeat = Arc::clone(&channels);
        let heartbeat_cancel = cancel.clone();
        tokio::spawn(async move {
            heartbeat.run_heartbeat(heartbeat_cancel).await;
        });

        *self.cancel.lock().await = Some(cancel);
        Ok(())
    }

    async fn stop(&self, _api: &Api) -> Result<()> {
        if let Some(cancel) = self.cancel.lock().await.take() {
            cancel.cancel();
        }
        Ok(())
    }
}
