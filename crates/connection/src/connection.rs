use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use {
    serde::Serialize,
    tokio::sync::RwLock,
};

use {
    axon_common::{Error, ErrorKind, Result},
    axon_sessions::{Session, SessionManager},
};

/// The transport a connection arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Web,
    WebSocket,
    Cli,
    Mcp,
    Oauth,
    Task,
    Test,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::WebSocket => "websocket",
            Self::Cli => "cli",
            Self::Mcp => "mcp",
            Self::Oauth => "oauth",
            Self::Task => "task",
            Self::Test => "test",
        }
    }
}

/// The limiter's verdict for the current request, carried on the connection
/// so the HTTP layer can emit `X-RateLimit-*` headers.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    /// Unix seconds when the current window resets.
    pub reset_at: u64,
    /// Seconds to wait; present only when the request was limited.
    pub retry_after: Option<u64>,
}

/// Capability for delivering pub/sub payloads to a connection's transport.
/// The base connection has none: transports that can receive broadcasts
/// (WebSocket) install one at ingress.
pub trait BroadcastSink: Send + Sync {
    fn deliver(&self, payload: serde_json::Value) -> Result<()>;
}

/// Per-client handle, transport-agnostic. Created at transport ingress,
/// registered in the process-wide map, destroyed exactly once on close.
pub struct Connection {
    pub id: String,
    pub kind: ConnectionKind,
    /// Remote IP, or a synthetic identifier for non-network transports.
    pub identifier: String,
    pub correlation_id: Option<String>,
    pub connected_at: Instant,
    session_loaded: AtomicBool,
    session: RwLock<Option<Session>>,
    subscriptions: RwLock<HashSet<String>>,
    rate_limit: RwLock<Option<RateLimitInfo>>,
    sink: Option<Arc<dyn BroadcastSink>>,
    sessions: Option<Arc<SessionManager>>,
    destroyed: AtomicBool,
}

impl Connection {
    pub fn new(kind: ConnectionKind, identifier: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            identifier: identifier.into(),
            correlation_id: None,
            connected_at: Instant::now(),
            session_loaded: AtomicBool::new(false),
            session: RwLock::new(None),
            subscriptions: RwLock::new(HashSet::new()),
            rate_limit: RwLock::new(None),
            sink: None,
            sessions: None,
            destroyed: AtomicBool::new(false),
        }
    }

    /// Reuse an existing id (cookie round-trips hand the id back to us).
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn BroadcastSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn with_session_manager(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    // ── Session ──────────────────────────────────────────────────────────

    pub fn session_loaded(&self) -> bool {
        self.session_loaded.load(Ordering::Acquire)
    }

    pub async fn set_session(&self, session: Session) {
        *self.session.write().await = Some(session);
        self.session_loaded.store(true, Ordering::Release);
    }

    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    pub async fn user_id(&self) -> Option<String> {
        self.session.read().await.as_ref().and_then(Session::user_id)
    }

    /// Deep-merge `partial` into the session's data and persist it with a
    /// TTL refresh. Requires a loaded session.
    pub async fn update_session(&self, partial: &serde_json::Value) -> Result<()> {
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or_else(|| {
            Error::new(ErrorKind::ConnectionSessionNotFound, "session not loaded")
        })?;
        match &self.sessions {
            Some(manager) => manager.update(session, partial).await,
            None => {
                // No persistence attached (tests, task connections): merge
                // the in-memory copy only.
                let mut data = serde_json::Value::Object(std::mem::take(&mut session.data));
                axon_common::deep_merge(&mut data, partial);
                if let serde_json::Value::Object(map) = data {
                    session.data = map;
                }
                Ok(())
            },
        }
    }

    // ── Subscriptions (this process's view only) ─────────────────────────

    /// Returns false when already subscribed.
    pub async fn subscribe(&self, channel: &str) -> bool {
        self.subscriptions.write().await.insert(channel.to_string())
    }

    /// Returns false when not subscribed.
    pub async fn unsubscribe(&self, channel: &str) -> bool {
        self.subscriptions.write().await.remove(channel)
    }

    pub async fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.read().await.contains(channel)
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.read().await.iter().cloned().collect()
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    // ── Rate limiting ────────────────────────────────────────────────────

    pub async fn set_rate_limit(&self, info: RateLimitInfo) {
        *self.rate_limit.write().await = Some(info);
    }

    pub async fn rate_limit(&self) -> Option<RateLimitInfo> {
        self.rate_limit.read().await.clone()
    }

    // ── Broadcast delivery ───────────────────────────────────────────────

    /// Deliver a pub/sub payload to the transport.
    pub fn on_broadcast(&self, payload: serde_json::Value) -> Result<()> {
        match &self.sink {
            Some(sink) => sink.deliver(payload),
            None => Err(Error::new(
                ErrorKind::ConnectionTypeNotFound,
                format!("connection type {} cannot receive broadcasts", self.kind.as_str()),
            )),
        }
    }

    /// Marks this connection destroyed; true only for the first caller.
    pub(crate) fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}
