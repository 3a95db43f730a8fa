use std::{
    net::SocketAddr,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio_util::sync::CancellationToken;

use {
    axon_channels::Channels,
    axon_config::{SessionConfig, WebConfig},
    axon_connection::ConnectionMap,
    axon_dispatch::Dispatcher,
    axon_sessions::SessionManager,
};

/// Shared server runtime state, wrapped in Arc for use across handlers.
pub struct ServerState {
    pub web: WebConfig,
    pub session: SessionConfig,
    pub dispatcher: Arc<Dispatcher>,
    pub channels: Arc<Channels>,
    pub connections: Arc<ConnectionMap>,
    pub sessions: Arc<SessionManager>,
    /// Set while stop() drains WebSocket connections; upgrades are refused.
    draining: AtomicBool,
    /// Fired to tell every live socket to close with a shutdown reason.
    pub ws_shutdown: CancellationToken,
    bound: OnceLock<SocketAddr>,
}

impl ServerState {
    pub fn new(
        web: WebConfig,
        session: SessionConfig,
        dispatcher: Arc<Dispatcher>,
        channels: Arc<Channels>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        let connections = Arc::clone(channels.connections());
        Self {
            web,
            session,
            dispatcher,
            channels,
            connections,
            sessions,
            draining: AtomicBool::new(false),
            ws_shutdown: CancellationToken::new(),
            bound: OnceLock::new(),
        }
    }

    /// The listener's address once bound (relevant with port 0).
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound.get().copied()
    }

    pub(crate) fn set_bound_addr(&self, addr: SocketAddr) {
        let _ = self.bound.set(addr);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::Release);
        self.ws_shutdown.cancel();
    }

    /// Whether the Origin header value is acceptable (CORS and the CSWSH
    /// upgrade guard share this list).
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.web
            .allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
    }

    pub fn wildcard_origin(&self) -> bool {
        self.web.allowed_origins.iter().any(|o| o == "*")
    }
}
