//! HTTP ingress: request → connection → dispatch → enveloped response.
//!
//! Mounted as the router fallback so action routes (literal or `:name`
//! patterns) are resolved against the action registry, not axum's router.

use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        body::Body,
        extract::{ConnectInfo, Request, State},
        http::{HeaderMap, HeaderValue, Method, StatusCode, header},
        response::{IntoResponse, Response},
    },
    axum_extra::extract::CookieJar,
    tower::util::ServiceExt,
    tracing::debug,
};

use {
    axon_actions::RawParams,
    axon_common::{Error, ErrorKind},
    axon_connection::{Connection, ConnectionKind},
};

use crate::state::ServerState;

/// Request bodies beyond this are refused.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

pub async fn handle(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut response = route(Arc::clone(&state), request).await;
    apply_cors(response.headers_mut(), &state, origin.as_deref());
    response
}

async fn route(state: Arc<ServerState>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    // Preflight short-circuits before any routing.
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }

    // Unhandled well-known paths never reach action routing.
    if path.starts_with("/.well-known/") {
        return StatusCode::NOT_FOUND.into_response();
    }

    if let Some(api_path) = strip_prefix(&path, &state.web.api_prefix) {
        return action_request(state, request, &method, &api_path).await;
    }

    static_request(&state, request, &method).await
}

// ── Action requests ──────────────────────────────────────────────────────────

async fn action_request(
    state: Arc<ServerState>,
    request: Request,
    method: &Method,
    api_path: &str,
) -> Response {
    let (parts, body) = request.into_parts();
    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let conn = state.connections.register(build_connection(
        &state,
        &parts.headers,
        parts.extensions.get::<ConnectInfo<SocketAddr>>(),
        ConnectionKind::Web,
    ));

    let lookup = state.dispatcher.actions().find_route(method, api_path);
    let result = match lookup {
        None => {
            let error = Error::new(
                ErrorKind::ConnectionActionNotFound,
                format!("no action for {method} {api_path}"),
            );
            respond(&state, &conn, Err(error)).await
        },
        Some((action, captures)) => {
            match collect_params(&parts.headers, body, &parts.uri, captures).await {
                Err(error) => respond(&state, &conn, Err(error)).await,
                Ok(raw) => {
                    let name = action.def().name.clone();
                    let dispatched = state
                        .dispatcher
                        .dispatch(&conn, Some(&name), raw, Some(method.as_str()), Some(&url))
                        .await;
                    let outcome = match dispatched.error {
                        Some(error) => Err(error),
                        None => Ok(dispatched.response),
                    };
                    respond(&state, &conn, outcome).await
                },
            }
        },
    };

    state.connections.destroy(&conn);
    result
}

fn build_connection(
    state: &ServerState,
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
    kind: ConnectionKind,
) -> Arc<Connection> {
    let identifier = client_identifier(state, headers, peer);
    let correlation_id = correlation_id(state, headers);

    let mut conn = Connection::new(kind, identifier)
        .with_correlation_id(correlation_id)
        .with_session_manager(Arc::clone(&state.sessions));
    // The cookie round-trips the connection id, which doubles as the
    // session key.
    if let Some(existing) = CookieJar::from_headers(headers)
        .get(&state.session.cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
    {
        conn = conn.with_id(existing);
    }
    Arc::new(conn)
}

pub(crate) fn client_identifier(
    state: &ServerState,
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
) -> String {
    if state.web.trust_proxy
        && let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    peer.map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub(crate) fn correlation_id(state: &ServerState, headers: &HeaderMap) -> Option<String> {
    if !state.web.trust_proxy {
        return None;
    }
    headers
        .get(state.web.correlation_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Param precedence: path captures, then body, then query string. Later
/// entries win for scalar fields and append for list fields.
async fn collect_params(
    headers: &HeaderMap,
    body: Body,
    uri: &http::Uri,
    captures: Vec<(String, String)>,
) -> Result<RawParams, Error> {
    let mut raw = RawParams::new();
    for (key, value) in captures {
        raw.push_text(key, value);
    }

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| Error::wrap(ErrorKind::ConnectionActionParamFormatting, e))?;
    if !bytes.is_empty() {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if content_type.starts_with("application/json") {
            let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
                Error::wrap(ErrorKind::ConnectionActionParamFormatting, e)
            })?;
            raw.extend_from_object(&value);
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            raw.extend_from_urlencoded(&String::from_utf8_lossy(&bytes));
        }
    }

    if let Some(query) = uri.query() {
        raw.extend_from_urlencoded(query);
    }
    Ok(raw)
}

async fn respond(
    state: &ServerState,
    conn: &Arc<Connection>,
    outcome: Result<serde_json::Value, Error>,
) -> Response {
    let (status, body) = match &outcome {
        Ok(response) => (StatusCode::OK, response.clone()),
        Err(error) => (error.status(), error.to_envelope()),
    };

    let mut response = (status, axum::Json(body)).into_response();
    let headers = response.headers_mut();

    set_session_cookie(headers, state, conn);
    if let Some(info) = conn.rate_limit().await {
        insert(headers, "x-ratelimit-limit", &info.limit.to_string());
        insert(headers, "x-ratelimit-remaining", &info.remaining.to_string());
        insert(headers, "x-ratelimit-reset", &info.reset_at.to_string());
        if let Some(retry_after) = info.retry_after {
            insert(headers, "retry-after", &retry_after.to_string());
        }
    }
    if let Some(correlation) = &conn.correlation_id {
        insert(headers, state.web.correlation_header.as_str(), correlation);
    }
    response
}

fn set_session_cookie(headers: &mut HeaderMap, state: &ServerState, conn: &Connection) {
    let session = &state.session;
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; SameSite={}",
        session.cookie_name,
        conn.id,
        session.ttl_secs,
        same_site(&session.same_site),
    );
    if session.http_only {
        cookie.push_str("; HttpOnly");
    }
    if session.secure {
        cookie.push_str("; Secure");
    }
    insert(headers, "set-cookie", &cookie);
}

fn same_site(value: &str) -> &'static str {
    match value.to_ascii_lowercase().as_str() {
        "strict" => "Strict",
        "none" => "None",
        _ => "Lax",
    }
}

// ── Static files ─────────────────────────────────────────────────────────────

async fn static_request(state: &ServerState, request: Request, method: &Method) -> Response {
    if *method != Method::GET && *method != Method::HEAD {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(dir) = &state.web.static_dir else {
        return StatusCode::NOT_FOUND.into_response();
    };
    debug!(path = request.uri().path(), "serving static");
    match tower_http::services::ServeDir::new(dir).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

// ── CORS ─────────────────────────────────────────────────────────────────────

/// The wildcard is only emitted when configured AND the request carried no
/// Origin; an allowed origin is echoed with credentials and `Vary`.
pub(crate) fn apply_cors(headers: &mut HeaderMap, state: &ServerState, origin: Option<&str>) {
    match origin {
        None => {
            if state.wildcard_origin() {
                insert(headers, "access-control-allow-origin", "*");
            }
        },
        Some(origin) if state.origin_allowed(origin) => {
            insert(headers, "access-control-allow-origin", origin);
            insert(headers, "vary", "Origin");
            insert(headers, "access-control-allow-credentials", "true");
        },
        Some(_) => return,
    }
    insert(headers, "access-control-allow-methods", &state.web.cors_methods);
    insert(headers, "access-control-allow-headers", &state.web.cors_headers);
}

fn strip_prefix(path: &str, prefix: &str) -> Option<String> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some("/".to_string());
    }
    rest.starts_with('/').then(|| rest.to_string())
}

pub(crate) fn insert(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        header::HeaderName::try_from(name),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}
