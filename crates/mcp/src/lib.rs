//! MCP adapter: exposes MCP-enabled actions as tools, gated by the OAuth
//! bearer tokens. The wire protocol itself is a collaborator behind
//! [`McpTransport`]; this crate only drives the dispatch pipeline.

mod service;
mod transport;

pub use {
    service::{McpService, Tool},
    transport::McpTransport,
};
