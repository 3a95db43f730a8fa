//! Redis-backed sessions with TTL refresh on access.

mod manager;
mod store;

pub use {
    manager::SessionManager,
    store::{MemorySessionStore, RedisSessionStore, Session, SessionStore},
};
