//! Application assembly: the builder collecting user actions, middleware,
//! and channels, and the framework-builtin components it registers.
//!
//! Components find their dependencies through the shared namespace:
//! `redis` → stores → `actions`/`sessions`/`ratelimit` → `dispatch` →
//! `channels` → the web server. User code appends its own components after
//! the builtins; priorities alone decide execution order.

use std::{any::Any, sync::Arc, time::Instant};

use {async_trait::async_trait, http::Method, tokio::sync::Mutex, tracing::debug};

use {
    axon_actions::{
        Action, ActionDef, ActionMiddleware, ActionRegistry, FnAction, McpOptions,
        MiddlewareRegistry,
    },
    axon_channels::{ChannelDef, ChannelRegistry, ChannelsComponent},
    axon_common::{Context, ErrorKind, Result},
    axon_config::AppConfig,
    axon_connection::ConnectionMap,
    axon_dispatch::Dispatcher,
    axon_ratelimit::{MemoryCounter, RateCounter, RateLimitMiddleware, RateLimiter, RedisCounter},
    axon_redis::{RedisComponent, RedisHandle},
    axon_registry::{Api, Component, Registry},
    axon_sessions::{MemorySessionStore, RedisSessionStore, SessionManager, SessionStore},
    axon_tasks::SchedulerComponent,
};

use crate::server::WebServerComponent;

/// Collects everything an application defines, then folds it into a
/// [`Registry`] of lifecycle components.
pub struct App {
    config: AppConfig,
    actions: Vec<Arc<dyn Action>>,
    middleware: Vec<Arc<dyn ActionMiddleware>>,
    channels: Vec<ChannelDef>,
    extra_components: Vec<Box<dyn Component>>,
    in_memory: bool,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            actions: Vec::new(),
            middleware: Vec::new(),
            channels: Vec::new(),
            extra_components: Vec::new(),
            in_memory: false,
        }
    }

    #[must_use]
    pub fn action(mut self, action: Arc<dyn Action>) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn middleware(mut self, middleware: Arc<dyn ActionMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    #[must_use]
    pub fn channel(mut self, channel: ChannelDef) -> Self {
        self.channels.push(channel);
        self
    }

    #[must_use]
    pub fn component(mut self, component: Box<dyn Component>) -> Self {
        self.extra_components.push(component);
        self
    }

    /// Run without Redis: in-memory stores, in-process pub/sub. Single
    /// process only; tests and offline CLI runs.
    #[must_use]
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Register the framework-builtin components plus the user's, ready
    /// for `start(mode)`.
    pub fn into_registry(mut self) -> Registry {
        let connections = Arc::new(ConnectionMap::new());
        let mut registry = Registry::new();

        if !self.in_memory {
            registry.register(Box::new(RedisComponent::new(self.config.redis.clone())));
        }
        registry.register(Box::new(DatabaseComponent::new(&self.config)));
        registry.register(Box::new(SessionsComponent::new(&self.config)));
        registry.register(Box::new(RateLimiterComponent::new(&self.config)));

        self.actions.push(status_action(
            &self.config,
            Arc::clone(&connections),
        ));
        registry.register(Box::new(ActionsComponent::new(
            std::mem::take(&mut self.actions),
            std::mem::take(&mut self.middleware),
        )));
        registry.register(Box::new(DispatchComponent::new(&self.config)));

        let mut channel_defs = ChannelRegistry::new();
        for def in self.channels.drain(..) {
            channel_defs.register(def);
        }
        registry.register(Box::new(ChannelsComponent::new(
            channel_defs,
            self.config.channels.clone(),
            self.config.process.broadcast_channel(),
            Arc::clone(&connections),
        )));

        registry.register(Box::new(SchedulerComponent::new(self.config.tasks.clone())));
        registry.register(Box::new(WebServerComponent::new(self.config.clone())));

        for component in self.extra_components {
            registry.register(component);
        }
        registry
    }
}

/// The framework's own `status` action: proof the pipeline is wired.
fn status_action(config: &AppConfig, connections: Arc<ConnectionMap>) -> Arc<dyn Action> {
    let name = config.process.name.clone();
    let started = Instant::now();
    Arc::new(FnAction::new(
        ActionDef::new("status")
            .describe("process name, uptime, and connection count")
            .web(Method::GET, "/status")
            .mcp(McpOptions {
                enabled: true,
                ..McpOptions::default()
            }),
        move |_params, _conn, _cancel| {
            let name = name.clone();
            let connections = Arc::clone(&connections);
            let uptime_ms = started.elapsed().as_millis() as u64;
            async move {
                Ok(serde_json::json!({
                    "name": name,
                    "version": env!("CARGO_PKG_VERSION"),
                    "uptime_ms": uptime_ms,
                    "connections": connections.len(),
                }))
            }
        },
    ))
}

// ── Database ─────────────────────────────────────────────────────────────────

/// The SQL collaborator: a lazily connecting pool published for
/// application actions. The core itself runs no queries.
struct DatabaseComponent {
    config: axon_config::DatabaseConfig,
}

impl DatabaseComponent {
    fn new(config: &AppConfig) -> Self {
        Self {
            config: config.database.clone(),
        }
    }
}

#[async_trait]
impl Component for DatabaseComponent {
    fn name(&self) -> &str {
        "database"
    }

    fn load_priority(&self) -> i32 {
        150
    }

    async fn initialize(&self, _api: &Api) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(self.config.max_connections)
            .connect_lazy(&self.config.url)
            .context(ErrorKind::ServerInitialization, "database pool")?;
        Ok(Some(Arc::new(pool) as Arc<dyn Any + Send + Sync>))
    }
}

// ── Sessions ─────────────────────────────────────────────────────────────────

struct SessionsComponent {
    config: axon_config::SessionConfig,
}

impl SessionsComponent {
    fn new(config: &AppConfig) -> Self {
        Self {
            config: config.session.clone(),
        }
    }
}

#[async_trait]
impl Component for SessionsComponent {
    fn name(&self) -> &str {
        "sessions"
    }

    fn load_priority(&self) -> i32 {
        200
    }

    async fn initialize(&self, api: &Api) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        let store: Arc<dyn SessionStore> = match api.get::<RedisHandle>(axon_redis::NAMESPACE) {
            Some(redis) => Arc::new(RedisSessionStore::new((*redis).clone())),
            None => Arc::new(MemorySessionStore::new()),
        };
        let manager = Arc::new(SessionManager::new(store, self.config.clone()));
        Ok(Some(manager as Arc<dyn Any + Send + Sync>))
    }
}

// ── Rate limiter ─────────────────────────────────────────────────────────────

struct RateLimiterComponent {
    config: axon_config::RateLimitConfig,
}

impl RateLimiterComponent {
    fn new(config: &AppConfig) -> Self {
        Self {
            config: config.rate_limit.clone(),
        }
    }
}

#[async_trait]
impl Component for RateLimiterComponent {
    fn name(&self) -> &str {
        "ratelimit"
    }

    fn load_priority(&self) -> i32 {
        250
    }

    async fn initialize(&self, api: &Api) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        let counter: Arc<dyn RateCounter> = match api.get::<RedisHandle>(axon_redis::NAMESPACE) {
            Some(redis) => Arc::new(RedisCounter::new((*redis).clone())),
            None => Arc::new(MemoryCounter::new()),
        };
        let limiter = Arc::new(RateLimiter::new(counter, self.config.clone()));
        Ok(Some(limiter as Arc<dyn Any + Send + Sync>))
    }
}

// ── Actions ──────────────────────────────────────────────────────────────────

struct ActionsComponent {
    actions: Mutex<Option<Vec<Arc<dyn Action>>>>,
    middleware: Mutex<Option<Vec<Arc<dyn ActionMiddleware>>>>,
}

impl ActionsComponent {
    fn new(actions: Vec<Arc<dyn Action>>, middleware: Vec<Arc<dyn ActionMiddleware>>) -> Self {
        Self {
            actions: Mutex::new(Some(actions)),
            middleware: Mutex::new(Some(middleware)),
        }
    }
}

#[async_trait]
impl Component for ActionsComponent {
    fn name(&self) -> &str {
        axon_actions::NAMESPACE
    }

    fn load_priority(&self) -> i32 {
        300
    }

    async fn initialize(&self, api: &Api) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        let limiter = api
            .get::<RateLimiter>("ratelimit")
            .context(ErrorKind::ServerInitialization, "rate limiter not initialized")?;

        let mut middleware = MiddlewareRegistry::new();
        middleware.register(Arc::new(RateLimitMiddleware::new(Arc::clone(&limiter))));
        for entry in self.middleware.lock().await.take().unwrap_or_default() {
            middleware.register(entry);
        }

        let mut registry = ActionRegistry::new(Arc::new(middleware));
        for action in self.actions.lock().await.take().unwrap_or_default() {
            registry.register(action)?;
        }
        debug!(count = registry.names().len(), "actions registered");
        Ok(Some(Arc::new(registry) as Arc<dyn Any + Send + Sync>))
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

struct DispatchComponent {
    default_timeout_ms: u64,
}

impl DispatchComponent {
    fn new(config: &AppConfig) -> Self {
        Self {
            default_timeout_ms: config.actions.default_timeout_ms,
        }
    }
}

#[async_trait]
impl Component for DispatchComponent {
    fn name(&self) -> &str {
        axon_dispatch::NAMESPACE
    }

    fn load_priority(&self) -> i32 {
        350
    }

    async fn initialize(&self, api: &Api) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        let actions = api
            .get::<ActionRegistry>(axon_actions::NAMESPACE)
            .context(ErrorKind::ServerInitialization, "actions not initialized")?;
        let sessions = api
            .get::<SessionManager>("sessions")
            .context(ErrorKind::ServerInitialization, "sessions not initialized")?;
        let dispatcher = Arc::new(Dispatcher::new(actions, sessions, self.default_timeout_ms));
        Ok(Some(dispatcher as Arc<dyn Any + Send + Sync>))
    }
}
