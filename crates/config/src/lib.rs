//! Configuration loading, env overrides, and `${VAR}` substitution.
//!
//! Config files: `axon.toml`, `axon.yaml`, or `axon.json`, searched in `./`
//! then `~/.config/axon/`. Resolution order is defaults → per-key env vars
//! (with `_{ENV}` suffix support) → config file, and always completes before
//! the component registry is built.

pub mod env;
pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{find_config_file, resolve, resolve_with},
    schema::{
        ActionsConfig, AppConfig, ChannelsConfig, CliConfig, DatabaseConfig, LoggerConfig,
        McpConfig, ProcessConfig, RateLimitConfig, RedisConfig, SecurityHeaders, ServerConfig,
        SessionConfig, TasksConfig, WebConfig, WebSocketConfig,
    },
};
