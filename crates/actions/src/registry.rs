use std::{collections::HashMap, sync::Arc};

use {http::Method, tracing::debug};

use axon_common::{Error, ErrorKind, Result};

use crate::{
    action::Action,
    middleware::MiddlewareRegistry,
};

/// All registered actions, by unique name. Populated during initialize and
/// immutable afterwards.
pub struct ActionRegistry {
    middleware: Arc<MiddlewareRegistry>,
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new(middleware: Arc<MiddlewareRegistry>) -> Self {
        Self {
            middleware,
            actions: HashMap::new(),
        }
    }

    pub fn middleware(&self) -> &Arc<MiddlewareRegistry> {
        &self.middleware
    }

    /// Register an action. Duplicate names and unresolvable middleware
    /// references are definition bugs, reported as validation errors.
    pub fn register(&mut self, action: Arc<dyn Action>) -> Result<()> {
        let def = action.def();
        if self.actions.contains_key(&def.name) {
            return Err(Error::new(
                ErrorKind::ActionValidation,
                format!("action '{}' is already registered", def.name),
            ));
        }
        for name in &def.middleware {
            if self.middleware.get(name).is_none() {
                return Err(Error::new(
                    ErrorKind::ActionValidation,
                    format!("action '{}' references unknown middleware '{name}'", def.name),
                ));
            }
        }
        if let Some(task) = &def.task
            && task.frequency_ms == 0
        {
            return Err(Error::new(
                ErrorKind::TaskValidation,
                format!("action '{}' declares a task with zero frequency", def.name),
            ));
        }
        debug!(action = %def.name, "action registered");
        self.actions.insert(def.name.clone(), action);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn all(&self) -> Vec<Arc<dyn Action>> {
        self.actions.values().cloned().collect()
    }

    /// First action whose web route matches the request.
    pub fn find_route(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(Arc<dyn Action>, Vec<(String, String)>)> {
        for action in self.actions.values() {
            if let Some(route) = &action.def().web
                && let Some(captures) = route.matches(method, path)
            {
                return Some((Arc::clone(action), captures));
            }
        }
        None
    }

    /// Actions exposed as MCP tools.
    pub fn mcp_enabled(&self) -> Vec<Arc<dyn Action>> {
        let mut actions: Vec<_> = self
            .actions
            .values()
            .filter(|a| a.def().mcp.enabled)
            .cloned()
            .collect();
        actions.sort_by(|a, b| a.def().name.cmp(&b.def().name));
        actions
    }

    /// Actions with a scheduled task declaration.
    pub fn scheduled(&self) -> Vec<Arc<dyn Action>> {
        self.actions
            .values()
            .filter(|a| a.def().task.is_some())
            .cloned()
            .collect()
    }
}

/// Namespace name the registry is published under by the bootstrapper.
pub const NAMESPACE: &str = "actions";
