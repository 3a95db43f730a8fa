//! Config schema types. Every section has serde defaults so a partial (or
//! absent) config file still resolves to a runnable configuration.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub process: ProcessConfig,
    pub logger: LoggerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub channels: ChannelsConfig,
    pub actions: ActionsConfig,
    pub tasks: TasksConfig,
    pub server: ServerConfig,
}

/// Process identity. The name scopes the cluster pub/sub channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub name: String,
    /// Environment tag (`development`, `test`, `production`). Selects the
    /// `_{ENV}` suffix for env-var overrides.
    pub env: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            name: "axon".into(),
            env: "development".into(),
        }
    }
}

impl ProcessConfig {
    /// Name of the single cluster-wide pub/sub channel.
    pub fn broadcast_channel(&self) -> String {
        format!("{}:broadcast", self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Log level filter (trace, debug, info, warn, error).
    pub level: String,
    /// `text` or `json`.
    pub format: String,
    pub colorize: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
            colorize: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".into(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub ttl_secs: u64,
    /// `lax`, `strict`, or `none`.
    pub same_site: String,
    pub http_only: bool,
    pub secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "axon_session".into(),
            ttl_secs: 60 * 60 * 24,
            same_site: "lax".into(),
            http_only: true,
            secure: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window_ms: u64,
    pub authenticated_limit: u64,
    pub unauthenticated_limit: u64,
    pub key_prefix: String,
    /// Tighter limit applied to the mutable OAuth endpoints.
    pub oauth_register_limit: u64,
    pub oauth_register_window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 60_000,
            authenticated_limit: 600,
            unauthenticated_limit: 60,
            key_prefix: "rate".into(),
            oauth_register_limit: 10,
            oauth_register_window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// TTL on presence keys. Must exceed the heartbeat interval; 3x by
    /// default so one missed heartbeat never drops a live member.
    pub presence_ttl_secs: u64,
    pub presence_heartbeat_secs: u64,
    pub max_subscriptions: usize,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            presence_ttl_secs: 60,
            presence_heartbeat_secs: 20,
            max_subscriptions: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    /// Default per-action timeout when the definition does not set one.
    /// 0 disables the timeout.
    pub default_timeout_ms: u64,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub enabled: bool,
    /// Queues the in-process worker drains.
    pub queues: Vec<String>,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queues: vec!["default".into()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub web: WebConfig,
    pub cli: CliConfig,
    pub mcp: McpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
    /// Route prefix actions are served under.
    pub api_prefix: String,
    /// Allowed origins; `*` means any. Checked on CORS and WS upgrades.
    pub allowed_origins: Vec<String>,
    pub cors_methods: String,
    pub cors_headers: String,
    pub security_headers: SecurityHeaders,
    /// Trust the correlation-id header from upstream proxies.
    pub trust_proxy: bool,
    pub correlation_header: String,
    /// Externally visible origin (scheme://host[:port]) when behind a
    /// proxy; derived from the Host header otherwise.
    pub public_origin: Option<String>,
    /// Directory served for unmatched GET paths, when set.
    pub static_dir: Option<String>,
    pub websocket: WebSocketConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".into(),
            port: 8080,
            api_prefix: "/api".into(),
            allowed_origins: vec!["*".into()],
            cors_methods: "GET, POST, PUT, PATCH, DELETE, OPTIONS, HEAD".into(),
            cors_headers: "Content-Type, Authorization".into(),
            security_headers: SecurityHeaders::default(),
            trust_proxy: false,
            correlation_header: "x-correlation-id".into(),
            public_origin: None,
            static_dir: None,
            websocket: WebSocketConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityHeaders {
    pub content_security_policy: String,
    pub strict_transport_security: String,
    pub referrer_policy: String,
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self {
            content_security_policy: "default-src 'self'".into(),
            strict_transport_security: "max-age=31536000; includeSubDomains".into(),
            referrer_policy: "no-referrer".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub path: String,
    /// Tumbling one-second per-connection message budget.
    pub max_messages_per_second: u32,
    pub drain_timeout_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: "/ws".into(),
            max_messages_per_second: 20,
            drain_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub enabled: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// Action dispatched by the OAuth authorize form to log a user in.
    pub login_action: Option<String>,
    /// Action dispatched when the authorize form submits a signup.
    pub signup_action: Option<String>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "/mcp".into(),
            login_action: None,
            signup_action: None,
        }
    }
}
