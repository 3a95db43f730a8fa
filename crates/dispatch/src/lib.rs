//! The universal action-invocation pipeline.
//!
//! Every transport (HTTP, WebSocket, CLI, MCP, background tasks) funnels
//! through [`Dispatcher::dispatch`]: lookup, lazy session load, schema
//! validation, before-middleware, the timed run, after-middleware, failure
//! classification, and exactly one structured log record per call.

use std::{sync::Arc, time::Instant};

use {tokio_util::sync::CancellationToken, tracing::info};

use {
    axon_actions::{Action, ActionRegistry, Params, RawParams},
    axon_common::{Error, ErrorKind},
    axon_connection::Connection,
    axon_sessions::SessionManager,
};

/// Namespace name the dispatcher is published under.
pub const NAMESPACE: &str = "dispatch";

/// The outcome of one dispatch: a response value, or the typed error that
/// ended the pipeline.
#[derive(Debug)]
pub struct DispatchResult {
    pub response: serde_json::Value,
    pub error: Option<Error>,
}

impl DispatchResult {
    fn ok(response: serde_json::Value) -> Self {
        Self {
            response,
            error: None,
        }
    }

    fn err(error: Error) -> Self {
        Self {
            response: serde_json::Value::Null,
            error: Some(error),
        }
    }

    /// The CLI/WS envelope: `{response}` or `{error: {...}}`.
    pub fn to_envelope(&self) -> serde_json::Value {
        match &self.error {
            Some(error) => error.to_envelope(),
            None => serde_json::json!({ "response": self.response }),
        }
    }
}

pub struct Dispatcher {
    actions: Arc<ActionRegistry>,
    sessions: Arc<SessionManager>,
    default_timeout_ms: u64,
}

impl Dispatcher {
    pub fn new(
        actions: Arc<ActionRegistry>,
        sessions: Arc<SessionManager>,
        default_timeout_ms: u64,
    ) -> Self {
        Self {
            actions,
            sessions,
            default_timeout_ms,
        }
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Run one action for one connection. Fully concurrent across
    /// connections and actions.
    pub async fn dispatch(
        &self,
        conn: &Arc<Connection>,
        action_name: Option<&str>,
        raw_params: RawParams,
        method: Option<&str>,
        url: Option<&str>,
    ) -> DispatchResult {
        let started = Instant::now();
        let result = self.run_pipeline(conn, action_name, &raw_params).await;

        let (status, response, logged_params) = match result {
            Ok((response, params)) => ("OK", DispatchResult::ok(response), params),
            Err((error, params)) => (
                "ERROR",
                DispatchResult::err(error),
                params.unwrap_or_default(),
            ),
        };

        let sanitized = match action_name.and_then(|n| self.actions.get(n)) {
            Some(action) => action.def().input.sanitize(&logged_params),
            None => logged_params,
        };

        info!(
            action = action_name.unwrap_or("<none>"),
            conn_type = conn.kind.as_str(),
            status,
            duration_ms = started.elapsed().as_millis() as u64,
            method = method.unwrap_or(""),
            url = url.unwrap_or(""),
            identifier = %conn.identifier,
            correlation_id = conn.correlation_id.as_deref().unwrap_or(""),
            params = %serde_json::Value::Object(sanitized),
            "action"
        );

        response
    }

    async fn run_pipeline(
        &self,
        conn: &Arc<Connection>,
        action_name: Option<&str>,
        raw_params: &RawParams,
    ) -> Result<(serde_json::Value, Params), (Error, Option<Params>)> {
        // 1. Lookup.
        let action = action_name
            .and_then(|name| self.actions.get(name))
            .ok_or_else(|| {
                (
                    Error::new(
                        ErrorKind::ConnectionActionNotFound,
                        format!("unknown action: '{}'", action_name.unwrap_or("")),
                    ),
                    None,
                )
            })?;
        let def = action.def();

        // 2. Session: loaded at most once per connection.
        if !conn.session_loaded() {
            let session = self
                .sessions
                .load_or_create(&conn.id)
                .await
                .map_err(|e| (e, None))?;
            conn.set_session(session).await;
        }

        // 3. Validate.
        let mut params = def.input.validate(raw_params).map_err(|e| (e, None))?;

        // 4. Before-middleware, in registration order.
        let middleware = self
            .actions
            .middleware()
            .resolve(&def.middleware)
            .unwrap_or_default();
        for mw in &middleware {
            if let Some(updated) = mw
                .run_before(&params, conn)
                .await
                .map_err(|e| (e, Some(params.clone())))?
            {
                params = updated;
            }
        }

        // 5. Run, raced against the per-action timeout. The cancellation
        // token fires before the timeout error is raised.
        let timeout_ms = def.timeout_ms.unwrap_or(self.default_timeout_ms);
        let mut response = self
            .run_action(&action, &params, conn, timeout_ms)
            .await
            .map_err(|e| (e, Some(params.clone())))?;

        // 6. After-middleware, same order.
        for mw in &middleware {
            if let Some(updated) = mw
                .run_after(&params, &response, conn)
                .await
                .map_err(|e| (e, Some(params.clone())))?
            {
                response = updated;
            }
        }

        Ok((response, params))
    }

    async fn run_action(
        &self,
        action: &Arc<dyn Action>,
        params: &Params,
        conn: &Arc<Connection>,
        timeout_ms: u64,
    ) -> Result<serde_json::Value, Error> {
        let cancel = CancellationToken::new();
        let task = {
            let action = Arc::clone(action);
            let params = params.clone();
            let conn = Arc::clone(conn);
            let cancel = cancel.clone();
            tokio::spawn(async move { action.run(&params, &conn, cancel).await })
        };

        let joined = if timeout_ms == 0 {
            task.await
        } else {
            tokio::select! {
                joined = task => joined,
                () = tokio::time::sleep(std::time::Duration::from_millis(timeout_ms)) => {
                    cancel.cancel();
                    return Err(Error::new(
                        ErrorKind::ConnectionActionTimeout,
                        format!("action '{}' timed out after {timeout_ms}ms", action.def().name),
                    ));
                },
            }
        };

        match joined {
            Ok(result) => result,
            // The task panicked or was torn down: a non-typed failure.
            Err(join_error) => Err(Error::wrap(ErrorKind::ConnectionActionRun, join_error)),
        }
    }
}
