use std::{sync::Arc, time::Duration};

use {
    futures::StreamExt,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use {
    axon_common::{Error, ErrorKind, Result},
    axon_config::ChannelsConfig,
    axon_connection::{Connection, ConnectionMap},
};

use crate::{
    channel::{ChannelDef, ChannelRegistry, validate_channel_name},
    presence::PresenceStore,
    pubsub::{PubSubBus, PubSubMessage},
};

/// The realtime fabric: channel lookup and authorization, presence
/// bookkeeping, and the bridge from the cluster bus to local connections.
pub struct Channels {
    registry: ChannelRegistry,
    presence: Arc<dyn PresenceStore>,
    bus: Arc<dyn PubSubBus>,
    connections: Arc<ConnectionMap>,
    config: ChannelsConfig,
}

impl Channels {
    pub fn new(
        registry: ChannelRegistry,
        presence: Arc<dyn PresenceStore>,
        bus: Arc<dyn PubSubBus>,
        connections: Arc<ConnectionMap>,
        config: ChannelsConfig,
    ) -> Self {
        Self {
            registry,
            presence,
            bus,
            connections,
            config,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionMap> {
        &self.connections
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.config.presence_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.config.presence_heartbeat_secs)
    }

    fn find_channel(&self, name: &str) -> Result<Arc<ChannelDef>> {
        self.registry.find(name).ok_or_else(|| {
            Error::new(
                ErrorKind::ConnectionChannelAuthorization,
                format!("unknown channel: '{name}'"),
            )
        })
    }

    /// Channel middleware in order, then the channel's authorizer. Any
    /// failure aborts the subscription.
    pub async fn authorize_subscription(
        &self,
        channel: &str,
        conn: &Arc<Connection>,
    ) -> Result<Arc<ChannelDef>> {
        let def = self.find_channel(channel)?;
        for middleware in &def.middleware {
            middleware.run_before(channel, conn).await?;
        }
        if !def.authorizer.authorize(channel, conn).await? {
            return Err(Error::new(
                ErrorKind::ConnectionChannelAuthorization,
                format!("not authorized for channel '{channel}'"),
            ));
        }
        Ok(def)
    }

    /// The subscribe protocol: validate, authorize, record locally, add
    /// presence, and announce the join when this key came alive.
    pub async fn subscribe(&self, conn: &Arc<Connection>, channel: &str) -> Result<()> {
        validate_channel_name(channel)?;
        if conn.subscription_count().await >= self.config.max_subscriptions {
            return Err(Error::new(
                ErrorKind::ConnectionChannelValidation,
                "subscription limit reached",
            ));
        }
        let def = self.authorize_subscription(channel, conn).await?;

        conn.subscribe(channel).await;
        let key = def.presence_key(conn);
        let joined = self
            .presence
            .add(channel, &key, &conn.id, self.presence_ttl())
            .await?;
        debug!(conn_id = %conn.id, channel, key = %key, joined, "subscribed");
        if joined {
            self.broadcast(
                channel,
                serde_json::json!({ "event": "join", "presenceKey": key }),
                &conn.id,
            )
            .await?;
        }
        Ok(())
    }

    /// The dual of subscribe. Unsubscribing a channel the connection never
    /// joined is an error; the leave event fires only when the presence key
    /// went dark.
    pub async fn unsubscribe(&self, conn: &Arc<Connection>, channel: &str) -> Result<()> {
        validate_channel_name(channel)?;
        if !conn.unsubscribe(channel).await {
            return Err(Error::new(
                ErrorKind::ConnectionNotSubscribed,
                format!("not subscribed to '{channel}'"),
            ));
        }
        let key = match self.registry.find(channel) {
            Some(def) => def.presence_key(conn),
            None => conn.id.clone(),
        };
        let left = self.presence.remove(channel, &key, &conn.id).await?;
        debug!(conn_id = %conn.id, channel, key = %key, left, "unsubscribed");
        if left {
            self.broadcast(
                channel,
                serde_json::json!({ "event": "leave", "presenceKey": key }),
                &conn.id,
            )
            .await?;
        }
        Ok(())
    }

    /// Remove presence for everything the connection holds. Runs on
    /// transport close, before the connection is destroyed.
    pub async fn remove_all(&self, conn: &Arc<Connection>) {
        for channel in conn.subscriptions().await {
            if let Err(e) = self.unsubscribe(conn, &channel).await {
                warn!(conn_id = %conn.id, channel, error = %e, "presence cleanup failed");
            }
        }
    }

    /// Publish onto the cluster bus.
    pub async fn broadcast(
        &self,
        channel: &str,
        message: serde_json::Value,
        sender: &str,
    ) -> Result<()> {
        self.bus
            .publish(&PubSubMessage {
                channel: channel.to_string(),
                message,
                sender: sender.to_string(),
            })
            .await
    }

    /// Publish from a connection; membership is required.
    pub async fn broadcast_from(
        &self,
        conn: &Arc<Connection>,
        channel: &str,
        message: serde_json::Value,
    ) -> Result<()> {
        if !conn.is_subscribed(channel).await {
            return Err(Error::new(
                ErrorKind::ConnectionNotSubscribed,
                format!("not subscribed to '{channel}'"),
            ));
        }
        self.broadcast(channel, message, &conn.id).await
    }

    /// Distinct presence keys on a channel, cluster-wide.
    pub async fn members(&self, channel: &str) -> Result<Vec<String>> {
        validate_channel_name(channel)?;
        self.presence.members(channel).await
    }

    // ── Fan-in from the bus ──────────────────────────────────────────────

    /// Deliver one bus message to every local subscribed connection.
    pub async fn fanout(&self, msg: &PubSubMessage) {
        let frame = serde_json::json!({
            "message": {
                "channel": msg.channel,
                "message": msg.message,
                "sender": msg.sender,
            }
        });
        for conn in self.connections.snapshot() {
            if conn.is_subscribed(&msg.channel).await
                && let Err(e) = conn.on_broadcast(frame.clone())
            {
                debug!(conn_id = %conn.id, error = %e, "broadcast delivery failed");
            }
        }
    }

    /// The bridge loop: one dedicated subscriber connection per process.
    pub async fn run_fanout(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let mut stream = self.bus.subscribe().await?;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                next = stream.next() => match next {
                    Some(msg) => self.fanout(&msg).await,
                    None => return Ok(()),
                },
            }
        }
    }

    // ── Liveness ─────────────────────────────────────────────────────────

    /// Refresh TTLs for every (channel, key) held by a local connection.
    pub async fn heartbeat(&self) {
        for conn in self.connections.snapshot() {
            for channel in conn.subscriptions().await {
                let key = match self.registry.find(&channel) {
                    Some(def) => def.presence_key(&conn),
                    None => conn.id.clone(),
                };
                if let Err(e) = self.presence.refresh(&channel, &key, self.presence_ttl()).await {
                    warn!(channel, error = %e, "presence heartbeat failed");
                }
            }
        }
    }

    /// Periodic heartbeat driver. The TTL outlives the interval by the
    /// configured safety factor, so a crashed host's keys expire on their
    /// own.
    pub async fn run_heartbeat(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.heartbeat_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = interval.tick() => self.heartbeat().await,
            }
        }
    }
}
