//! Channels, presence, and the cluster pub/sub fabric.
//!
//! Subscription authorization and presence bookkeeping live here; the
//! fan-out bridge delivers bus messages to every local connection whose
//! subscription set matches. Presence join/leave events fire exactly once
//! per empty↔non-empty transition, guarded by the atomic store operations.

mod channel;
mod component;
mod presence;
mod pubsub;
mod service;

pub use {
    channel::{
        AllowAll, ChannelAuthorizer, ChannelDef, ChannelMiddleware, ChannelRegistry,
        validate_channel_name,
    },
    component::{ChannelsComponent, NAMESPACE},
    presence::{MemoryPresence, PresenceStore, RedisPresence},
    pubsub::{LocalBus, MessageStream, PubSubBus, PubSubMessage, RedisBus},
    service::Channels,
};
