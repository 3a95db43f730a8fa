use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    redis::AsyncCommands,
    serde::{Deserialize, Serialize},
};

use axon_common::{Context, ErrorKind, Result};

/// Per-client session state, persisted under `session:{id}`.
///
/// The id doubles as the session cookie value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub cookie_name: String,
    pub created_at: u64,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Session {
    pub fn new(id: impl Into<String>, cookie_name: impl Into<String>) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            id: id.into(),
            cookie_name: cookie_name.into(),
            created_at,
            data: serde_json::Map::new(),
        }
    }

    /// The user id, when a login action has stored one.
    pub fn user_id(&self) -> Option<String> {
        match self.data.get("userId") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Persistence seam for sessions. Redis in production; in-memory for tests
/// and for CLI runs without a reachable Redis.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Session>>;
    async fn save(&self, session: &Session, ttl: Duration) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

// ── Redis ────────────────────────────────────────────────────────────────────

pub struct RedisSessionStore {
    redis: axon_redis::RedisHandle,
}

impl RedisSessionStore {
    pub fn new(redis: axon_redis::RedisHandle) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>> {
        let key = axon_redis::keys::session(id);
        let mut conn = self.redis.commands();
        let raw: Option<String> = conn
            .get(&key)
            .await
            .context(ErrorKind::ConnectionServerError, "session load")?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let session: Session = serde_json::from_str(&raw)
            .context(ErrorKind::ConnectionServerError, "session decode")?;
        Ok(Some(session))
    }

    async fn save(&self, session: &Session, ttl: Duration) -> Result<()> {
        let key = axon_redis::keys::session(&session.id);
        let raw = serde_json::to_string(session)
            .context(ErrorKind::ConnectionServerError, "session encode")?;
        let mut conn = self.redis.commands();
        let _: () = conn
            .set_ex(&key, raw, ttl.as_secs())
            .await
            .context(ErrorKind::ConnectionServerError, "session save")?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let key = axon_redis::keys::session(id);
        let mut conn = self.redis.commands();
        let _: () = conn
            .del(&key)
            .await
            .context(ErrorKind::ConnectionServerError, "session delete")?;
        Ok(())
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, (Session, Instant)>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| poisoned())?;
        match entries.get(id) {
            Some((session, expires)) if *expires > Instant::now() => Ok(Some(session.clone())),
            Some(_) => {
                entries.remove(id);
                Ok(None)
            },
            None => Ok(None),
        }
    }

    async fn save(&self, session: &Session, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.insert(session.id.clone(), (session.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.remove(id);
        Ok(())
    }
}

fn poisoned() -> axon_common::Error {
    axon_common::Error::new(ErrorKind::ConnectionServerError, "session store poisoned")
}
