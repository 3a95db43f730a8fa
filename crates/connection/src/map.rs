use std::sync::Arc;

use {dashmap::DashMap, tracing::debug};

use crate::connection::Connection;

/// The process-wide connection map, keyed by connection id.
///
/// A connection id exists in the map iff the connection is live; `destroy`
/// removes it exactly once, after which no pub/sub fan-out reaches it.
#[derive(Default)]
pub struct ConnectionMap {
    inner: DashMap<String, Arc<Connection>>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn: Arc<Connection>) -> Arc<Connection> {
        self.inner.insert(conn.id.clone(), Arc::clone(&conn));
        conn
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.inner.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove and mark destroyed. Idempotent; only the first call removes.
    pub fn destroy(&self, conn: &Connection) {
        if conn.mark_destroyed() {
            self.inner.remove(&conn.id);
            debug!(conn_id = %conn.id, kind = conn.kind.as_str(), "connection destroyed");
        }
    }

    /// A stable snapshot for pub/sub fan-out.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.inner.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::connection::ConnectionKind;

    #[tokio::test]
    async fn register_and_destroy() {
        let map = ConnectionMap::new();
        let conn = map.register(Arc::new(Connection::new(ConnectionKind::Test, "t")));
        assert!(map.get(&conn.id).is_some());
        assert_eq!(map.len(), 1);

        map.destroy(&conn);
        assert!(map.get(&conn.id).is_none());
        assert!(conn.is_destroyed());

        // Second destroy is a no-op even if the id was reused.
        let other = map.register(Arc::new(
            Connection::new(ConnectionKind::Test, "t2").with_id(conn.id.clone()),
        ));
        map.destroy(&conn);
        assert!(map.get(&other.id).is_some());
    }

    #[tokio::test]
    async fn subscriptions_are_local_set_ops() {
        let conn = Connection::new(ConnectionKind::Test, "t");
        assert!(conn.subscribe("room:1").await);
        assert!(!conn.subscribe("room:1").await);
        assert!(conn.is_subscribed("room:1").await);
        assert!(conn.unsubscribe("room:1").await);
        assert!(!conn.unsubscribe("room:1").await);
    }

    #[tokio::test]
    async fn base_connection_rejects_broadcasts() {
        let conn = Connection::new(ConnectionKind::Cli, "local");
        let err = conn.on_broadcast(serde_json::json!({})).unwrap_err();
        assert_eq!(err.kind, axon_common::ErrorKind::ConnectionTypeNotFound);
    }
}
