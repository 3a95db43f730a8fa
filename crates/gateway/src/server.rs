//! Router assembly and the web server lifecycle component, including the
//! draining stop sequence.

use std::{any::Any, net::SocketAddr, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    axum::{
        Router,
        extract::{Request, State},
        middleware::{self, Next},
        response::Response,
        routing::get,
    },
    tokio::{net::TcpListener, sync::Mutex, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use {
    axon_channels::Channels,
    axon_common::{Context, Error, ErrorKind, Result},
    axon_config::AppConfig,
    axon_connection::ConnectionKind,
    axon_dispatch::Dispatcher,
    axon_mcp::McpService,
    axon_oauth::{MemoryOAuthStore, OAuthService, OAuthState, OAuthStore, RedisOAuthStore},
    axon_ratelimit::RateLimiter,
    axon_redis::RedisHandle,
    axon_registry::{Api, Component, RunMode},
    axon_sessions::SessionManager,
};

use crate::{
    http,
    mcp_routes::{self, McpRoutes},
    state::ServerState,
    ws,
};

pub const NAMESPACE: &str = "web";

/// Assemble the full application router: OAuth and MCP mounts (when
/// enabled), the WebSocket upgrade path, the action fallback, and the
/// security-header layer over everything.
pub fn build_app(
    state: Arc<ServerState>,
    oauth: Option<OAuthState>,
    mcp: Option<(String, McpRoutes)>,
) -> Router {
    let ws_path = state.web.websocket.path.clone();
    let mut app = Router::new()
        .route(&ws_path, get(ws::handle_upgrade))
        .fallback(http::handle)
        .with_state(Arc::clone(&state));

    if let Some(oauth_state) = oauth {
        app = app.merge(axon_oauth::router(oauth_state));
    }
    if let Some((endpoint, mcp_state)) = mcp {
        app = app.merge(mcp_routes::router(&endpoint, mcp_state));
    }

    app.layer(middleware::from_fn_with_state(state, security_headers))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Security headers go on every response, configurable values included.
async fn security_headers(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    let sec = &state.web.security_headers;
    http::insert(headers, "content-security-policy", &sec.content_security_policy);
    http::insert(headers, "x-content-type-options", "nosniff");
    http::insert(headers, "x-frame-options", "DENY");
    http::insert(headers, "strict-transport-security", &sec.strict_transport_security);
    http::insert(headers, "referrer-policy", &sec.referrer_policy);
    response
}

// ── Lifecycle component ──────────────────────────────────────────────────────

/// Binds and serves the app on start; on stop, drains WebSocket
/// connections before the listener goes away.
pub struct WebServerComponent {
    config: AppConfig,
    built: Mutex<Option<Arc<ServerState>>>,
    app: Mutex<Option<Router>>,
    server_cancel: Mutex<Option<CancellationToken>>,
    serve_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WebServerComponent {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            built: Mutex::new(None),
            app: Mutex::new(None),
            server_cancel: Mutex::new(None),
            serve_handle: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Component for WebServerComponent {
    fn name(&self) -> &str {
        NAMESPACE
    }

    fn load_priority(&self) -> i32 {
        900
    }

    fn start_priority(&self) -> i32 {
        900
    }

    /// The web surface stops first so in-flight work can settle before the
    /// stores underneath it go away.
    fn stop_priority(&self) -> i32 {
        100
    }

    fn run_modes(&self) -> &[RunMode] {
        &[RunMode::Server]
    }

    async fn initialize(&self, api: &Api) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        let dispatcher = api
            .get::<Dispatcher>(axon_dispatch::NAMESPACE)
            .context(ErrorKind::ServerInitialization, "dispatcher not initialized")?;
        let channels = api
            .get::<Channels>(axon_channels::NAMESPACE)
            .context(ErrorKind::ServerInitialization, "channels not initialized")?;
        let sessions = api
            .get::<SessionManager>("sessions")
            .context(ErrorKind::ServerInitialization, "sessions not initialized")?;
        let limiter = api
            .get::<RateLimiter>("ratelimit")
            .context(ErrorKind::ServerInitialization, "rate limiter not initialized")?;

        let state = Arc::new(ServerState::new(
            self.config.server.web.clone(),
            self.config.session.clone(),
            Arc::clone(&dispatcher),
            Arc::clone(&channels),
            Arc::clone(&sessions),
        ));

        // OAuth + MCP mount only when the MCP surface is enabled.
        let (oauth, mcp) = if self.config.server.mcp.enabled {
            let store: Arc<dyn OAuthStore> = match api.get::<RedisHandle>(axon_redis::NAMESPACE) {
                Some(redis) => Arc::new(RedisOAuthStore::new((*redis).clone())),
                None => Arc::new(MemoryOAuthStore::new()),
            };
            let oauth_service = Arc::new(OAuthService::new(
                store,
                Arc::clone(&dispatcher),
                self.config.server.mcp.clone(),
                Duration::from_secs(self.config.session.ttl_secs),
                self.config.server.web.public_origin.clone(),
            ));
            let mcp_service = Arc::new(McpService::new(
                Arc::clone(&dispatcher),
                Arc::clone(&oauth_service),
            ));
            (
                Some(OAuthState {
                    service: Arc::clone(&oauth_service),
                    limiter: Arc::clone(&limiter),
                    register_limit: self.config.rate_limit.oauth_register_limit,
                    register_window_ms: self.config.rate_limit.oauth_register_window_ms,
                }),
                Some((self.config.server.mcp.endpoint.clone(), McpRoutes {
                    service: mcp_service,
                    oauth: oauth_service,
                })),
            )
        } else {
            (None, None)
        };

        let app = build_app(Arc::clone(&state), oauth, mcp);
        *self.app.lock().await = Some(app);
        *self.built.lock().await = Some(Arc::clone(&state));
        Ok(Some(state as Arc<dyn Any + Send + Sync>))
    }

    async fn start(&self, _api: &Api, _mode: RunMode) -> Result<()> {
        if !self.config.server.web.enabled {
            debug!("web server disabled");
            return Ok(());
        }
        let app = self
            .app
            .lock()
            .await
            .take()
            .context(ErrorKind::ServerStart, "web server not initialized")?;
        let bind = format!(
            "{}:{}",
            self.config.server.web.bind, self.config.server.web.port
        );
        let listener = TcpListener::bind(&bind)
            .await
            .context(ErrorKind::ServerStart, format!("bind {bind}"))?;
        let addr = listener
            .local_addr()
            .context(ErrorKind::ServerStart, "local addr")?;
        if let Some(state) = self.built.lock().await.as_ref() {
            state.set_bound_addr(addr);
        }
        info!(%addr, "web server listening");

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let handle = tokio::spawn(async move {
            let server = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = server.await {
                tracing::error!(error = %e, "web server exited");
            }
        });
        *self.server_cancel.lock().await = Some(cancel);
        *self.serve_handle.lock().await = Some(handle);
        Ok(())
    }

    async fn stop(&self, _api: &Api) -> Result<()> {
        let Some(state) = self.built.lock().await.clone() else {
            return Ok(());
        };

        // Draining: refuse upgrades, tell every socket to close, then wait
        // out the grace period before the listener is torn down.
        state.begin_drain();
        let deadline = Duration::from_millis(state.web.websocket.drain_timeout_ms);
        let waited = tokio::time::timeout(deadline, async {
            loop {
                let live_sockets = state
                    .connections
                    .snapshot()
                    .iter()
                    .filter(|c| c.kind == ConnectionKind::WebSocket)
                    .count();
                if live_sockets == 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if waited.is_err() {
            debug!("websocket drain timed out, proceeding");
        }

        if let Some(cancel) = self.server_cancel.lock().await.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.serve_handle.lock().await.take() {
            handle
                .await
                .map_err(|e| Error::wrap(ErrorKind::ServerStop, e))?;
        }
        info!("web server stopped");
        Ok(())
    }
}
