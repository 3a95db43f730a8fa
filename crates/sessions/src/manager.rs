use std::{sync::Arc, time::Duration};

use tracing::debug;

use {axon_common::Result, axon_config::SessionConfig};

use crate::store::{Session, SessionStore};

/// Loads, creates, and persists sessions with the configured TTL.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_secs)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Load the session for a connection id, creating it when absent. A
    /// session evicted between requests is recreated rather than failing the
    /// request. Every load refreshes the TTL.
    pub async fn load_or_create(&self, id: &str) -> Result<Session> {
        if let Some(session) = self.store.load(id).await? {
            self.store.save(&session, self.ttl()).await?;
            return Ok(session);
        }
        debug!(session_id = id, "creating session");
        let session = Session::new(id, &self.config.cookie_name);
        self.store.save(&session, self.ttl()).await?;
        Ok(session)
    }

    /// Deep-merge `partial` into the session's data and persist, refreshing
    /// the TTL.
    pub async fn update(&self, session: &mut Session, partial: &serde_json::Value) -> Result<()> {
        let mut data = serde_json::Value::Object(std::mem::take(&mut session.data));
        axon_common::deep_merge(&mut data, partial);
        session.data = match data {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        self.store.save(session, self.ttl()).await
    }

    pub async fn destroy(&self, id: &str) -> Result<()> {
        self.store.delete(id).await
    }
}
