use std::sync::Arc;

use async_trait::async_trait;

use axon_common::Result;

use crate::service::McpService;

/// The wire-protocol seam. The framework ships an HTTP binding in the
/// gateway; alternative transports (stdio, SSE) implement this and drive
/// the same service.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn serve(&self, service: Arc<McpService>) -> Result<()>;
}
