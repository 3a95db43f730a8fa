//! HTTP binding for the MCP service: tool listing and tool calls behind
//! bearer verification. Unauthenticated requests get a `WWW-Authenticate`
//! pointer at the protected-resource metadata.

use std::sync::Arc;

use {
    axum::{
        Router,
        extract::State,
        http::{HeaderMap, StatusCode, header},
        response::{IntoResponse, Json, Response},
        routing::get,
    },
    tracing::warn,
};

use {
    axon_mcp::McpService,
    axon_oauth::{AccessToken, OAuthService},
};

use crate::ws::PeerAddr;

#[derive(Clone)]
pub struct McpRoutes {
    pub service: Arc<McpService>,
    pub oauth: Arc<OAuthService>,
}

pub fn router(endpoint: &str, state: McpRoutes) -> Router {
    Router::new()
        .route(
            endpoint,
            get(list_tools).post(call_tool).options(preflight),
        )
        .with_state(state)
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn authenticate(
    state: &McpRoutes,
    headers: &HeaderMap,
) -> Result<AccessToken, Response> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match state.service.authenticate(bearer).await {
        Ok(Some(token)) => Ok(token),
        Ok(None) => Err(unauthorized(&state.oauth, headers)),
        Err(e) => {
            warn!(error = %e, "mcp token verification failed");
            Err(unauthorized(&state.oauth, headers))
        },
    }
}

fn unauthorized(oauth: &OAuthService, headers: &HeaderMap) -> Response {
    let origin = oauth.origin(
        headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok()),
    );
    let challenge = format!(
        "Bearer resource_metadata=\"{origin}/.well-known/oauth-protected-resource\""
    );
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        Json(serde_json::json!({ "error": "unauthorized" })),
    )
        .into_response()
}

async fn list_tools(State(state): State<McpRoutes>, headers: HeaderMap) -> Response {
    if let Err(denied) = authenticate(&state, &headers).await {
        return denied;
    }
    Json(serde_json::json!({ "tools": state.service.list_tools() })).into_response()
}

async fn call_tool(
    State(state): State<McpRoutes>,
    peer: PeerAddr,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let token = match authenticate(&state, &headers).await {
        Ok(token) => token,
        Err(denied) => return denied,
    };

    let Some(tool) = body
        .get("tool")
        .or_else(|| body.get("name"))
        .and_then(|v| v.as_str())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "tool is required" })),
        )
            .into_response();
    };
    let arguments = body
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    let identifier = peer
        .0
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "mcp".to_string());

    match state
        .service
        .call_tool(tool, &arguments, &token, &identifier)
        .await
    {
        Ok(result) => match result.error {
            Some(error) => (error.status(), Json(error.to_envelope())).into_response(),
            None => Json(serde_json::json!({ "response": result.response })).into_response(),
        },
        Err(error) => (error.status(), Json(error.to_envelope())).into_response(),
    }
}
