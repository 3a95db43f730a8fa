//! The transport-agnostic per-client handle and the process-wide map.

mod connection;
mod map;

pub use {
    connection::{BroadcastSink, Connection, ConnectionKind, RateLimitInfo},
    map::ConnectionMap,
};
