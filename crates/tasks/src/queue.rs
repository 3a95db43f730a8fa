use std::sync::Arc;

use {async_trait::async_trait, tracing::warn};

use {
    axon_actions::RawParams,
    axon_common::{Error, ErrorKind, Result},
    axon_connection::{Connection, ConnectionKind},
    axon_dispatch::Dispatcher,
};

/// The background-queue seam. The framework only depends on enqueue; a
/// durable queue library plugs in here.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, action: &str, params: serde_json::Value, queue: &str) -> Result<()>;
}

/// In-process queue: runs the action through the dispatch pipeline on a
/// `task` connection, immediately and off the caller's path.
pub struct LocalQueue {
    dispatcher: Arc<Dispatcher>,
    queues: Vec<String>,
}

impl LocalQueue {
    pub fn new(dispatcher: Arc<Dispatcher>, queues: Vec<String>) -> Self {
        Self { dispatcher, queues }
    }
}

#[async_trait]
impl TaskQueue for LocalQueue {
    async fn enqueue(&self, action: &str, params: serde_json::Value, queue: &str) -> Result<()> {
        if !self.queues.iter().any(|q| q == queue) {
            return Err(Error::new(
                ErrorKind::TaskValidation,
                format!("unknown queue: '{queue}'"),
            ));
        }
        let dispatcher = Arc::clone(&self.dispatcher);
        let action = action.to_string();
        let mut raw = RawParams::new();
        raw.extend_from_object(&params);
        tokio::spawn(async move {
            let conn = Arc::new(Connection::new(ConnectionKind::Task, "task"));
            let result = dispatcher
                .dispatch(&conn, Some(&action), raw, None, None)
                .await;
            if let Some(error) = result.error {
                warn!(action = %action, error = %error, "task run failed");
            }
        });
        Ok(())
    }
}
