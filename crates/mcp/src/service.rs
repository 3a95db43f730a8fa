use std::sync::Arc;

use {serde::Serialize, tracing::debug};

use {
    axon_actions::RawParams,
    axon_common::{Error, ErrorKind, Result},
    axon_connection::{Connection, ConnectionKind},
    axon_dispatch::{DispatchResult, Dispatcher},
    axon_oauth::{AccessToken, OAuthService},
    axon_sessions::Session,
};

/// One MCP tool: an action's name, description, and input schema rendered
/// as JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Maps tool listings and calls onto the action registry and the dispatch
/// pipeline.
pub struct McpService {
    dispatcher: Arc<Dispatcher>,
    oauth: Arc<OAuthService>,
}

impl McpService {
    pub fn new(dispatcher: Arc<Dispatcher>, oauth: Arc<OAuthService>) -> Self {
        Self { dispatcher, oauth }
    }

    /// Every MCP-enabled action, as a tool descriptor.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.dispatcher
            .actions()
            .mcp_enabled()
            .into_iter()
            .map(|action| {
                let def = action.def();
                Tool {
                    name: def.name.clone(),
                    description: def.description.clone(),
                    input_schema: def.input.to_json_schema(),
                }
            })
            .collect()
    }

    /// Resolve a bearer token; None means 401 upstream.
    pub async fn authenticate(&self, bearer: Option<&str>) -> Result<Option<AccessToken>> {
        let Some(token) = bearer else {
            return Ok(None);
        };
        self.oauth.verify_access_token(token).await
    }

    /// Invoke one tool through the dispatch pipeline on a fresh `mcp`
    /// connection whose session already carries the token's user.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: &serde_json::Value,
        token: &AccessToken,
        identifier: &str,
    ) -> Result<DispatchResult> {
        let action = self.dispatcher.actions().get(name).ok_or_else(|| {
            Error::new(
                ErrorKind::ConnectionActionNotFound,
                format!("unknown tool: '{name}'"),
            )
        })?;
        if !action.def().mcp.enabled {
            return Err(Error::new(
                ErrorKind::ConnectionActionNotFound,
                format!("tool '{name}' is not exposed"),
            ));
        }

        let conn = Arc::new(Connection::new(ConnectionKind::Mcp, identifier));
        let mut session = Session::new(
            conn.id.clone(),
            self.dispatcher.sessions().cookie_name(),
        );
        session.data.insert(
            "userId".into(),
            serde_json::Value::String(token.user_id.clone()),
        );
        conn.set_session(session).await;

        let mut raw = RawParams::new();
        raw.extend_from_object(arguments);
        debug!(tool = name, user_id = %token.user_id, "mcp tool call");
        Ok(self
            .dispatcher
            .dispatch(&conn, Some(name), raw, Some("POST"), Some("/mcp"))
            .await)
    }
}
