//! Gateway: the HTTP/WebSocket server over the dispatch pipeline, plus
//! application assembly.
//!
//! Lifecycle:
//! 1. Resolve config (strictly before the registry exists)
//! 2. `App` collects actions, middleware, channels, extra components
//! 3. `into_registry()` registers the builtin component set
//! 4. `start(mode)` initializes by load priority and brings up the server
//! 5. `stop()` drains sockets, then unwinds by stop priority
//!
//! Domain logic lives in the other crates; this one adapts transports onto
//! the dispatcher and owns the server lifecycle.

pub mod boot;
pub mod http;
pub mod mcp_routes;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    boot::App,
    server::{WebServerComponent, build_app},
    state::ServerState,
};
