use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use {
    axon_common::Result,
    axon_connection::Connection,
};

use crate::schema::Params;

/// Hooks bracketing an action's `run`. Both hooks execute strictly in
/// registration order; returning `Some` replaces the params (before) or the
/// response (after).
#[async_trait]
pub trait ActionMiddleware: Send + Sync {
    fn name(&self) -> &str;

    async fn run_before(
        &self,
        _params: &Params,
        _conn: &Arc<Connection>,
    ) -> Result<Option<Params>> {
        Ok(None)
    }

    async fn run_after(
        &self,
        _params: &Params,
        _response: &serde_json::Value,
        _conn: &Arc<Connection>,
    ) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }
}

/// Middleware instances by name; action definitions reference these names.
#[derive(Default)]
pub struct MiddlewareRegistry {
    by_name: HashMap<String, Arc<dyn ActionMiddleware>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, middleware: Arc<dyn ActionMiddleware>) {
        self.by_name.insert(middleware.name().to_string(), middleware);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionMiddleware>> {
        self.by_name.get(name).cloned()
    }

    /// Resolve an ordered name list; None if any name is unknown.
    pub fn resolve(&self, names: &[String]) -> Option<Vec<Arc<dyn ActionMiddleware>>> {
        names.iter().map(|n| self.get(n)).collect()
    }
}
