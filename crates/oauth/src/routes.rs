use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use {
    askama::Template,
    axum::{
        Router,
        extract::{ConnectInfo, Form, Query, State},
        http::{HeaderMap, Method, StatusCode, header, request::Parts},
        middleware::{self, Next},
        response::{Html, IntoResponse, Json, Response},
        routing::{get, post},
    },
    tracing::warn,
};

use axon_ratelimit::RateLimiter;

use crate::{
    service::OAuthService,
    types::{OAuthError, RegistrationRequest},
};

#[derive(Clone)]
pub struct OAuthState {
    pub service: Arc<OAuthService>,
    pub limiter: Arc<RateLimiter>,
    pub register_limit: u64,
    pub register_window_ms: u64,
}

/// The OAuth endpoints. Mounted at the root of the web server; the
/// `.well-known` documents must live at the origin.
pub fn router(state: OAuthState) -> Router {
    Router::new()
        .route(
            "/.well-known/oauth-protected-resource",
            get(protected_resource).options(preflight),
        )
        .route(
            "/.well-known/oauth-authorization-server",
            get(server_metadata).options(preflight),
        )
        .route("/oauth/register", post(register).options(preflight))
        .route(
            "/oauth/authorize",
            get(authorize_page).post(authorize_submit).options(preflight),
        )
        .route("/oauth/token", post(token).options(preflight))
        .layer(middleware::from_fn_with_state(state.clone(), throttle_mutable))
        .with_state(state)
}

// ── Extractors ───────────────────────────────────────────────────────────────

/// The peer address, when the server was built with connect info; a
/// placeholder otherwise (tests drive the router directly).
struct RemoteIp(String);

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for RemoteIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(remote_ip_of(&parts.extensions)))
    }
}

fn remote_ip_of(extensions: &http::Extensions) -> String {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// ── Throttle ─────────────────────────────────────────────────────────────────

/// The register rate-limit overrides apply to every mutable OAuth path.
async fn throttle_mutable(
    State(state): State<OAuthState>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if request.method() == Method::POST {
        let ip = remote_ip_of(request.extensions());
        let verdict = state
            .limiter
            .check_with(
                &format!("oauth:{ip}"),
                state.register_limit,
                state.register_window_ms,
            )
            .await;
        match verdict {
            Ok(info) if info.retry_after.is_some() => {
                let retry = info.retry_after.unwrap_or(1).to_string();
                let body = axon_common::Error::new(
                    axon_common::ErrorKind::ConnectionRateLimited,
                    "rate limit exceeded",
                )
                .to_envelope();
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry)],
                    Json(body),
                )
                    .into_response();
            },
            Ok(_) => {},
            Err(e) => warn!(error = %e, "oauth throttle check failed"),
        }
    }
    next.run(request).await
}

// ── Metadata ─────────────────────────────────────────────────────────────────

fn host_of(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST).and_then(|v| v.to_str().ok())
}

async fn protected_resource(State(state): State<OAuthState>, headers: HeaderMap) -> Json<serde_json::Value> {
    let origin = state.service.origin(host_of(&headers));
    Json(state.service.protected_resource_metadata(&origin))
}

async fn server_metadata(State(state): State<OAuthState>, headers: HeaderMap) -> Json<serde_json::Value> {
    let origin = state.service.origin(host_of(&headers));
    Json(state.service.authorization_server_metadata(&origin))
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

// ── Registration ─────────────────────────────────────────────────────────────

async fn register(
    State(state): State<OAuthState>,
    Json(request): Json<RegistrationRequest>,
) -> Response {
    match state.service.register(request).await {
        Ok(client) => (StatusCode::CREATED, Json(client)).into_response(),
        Err(e) => oauth_error(e),
    }
}

// ── Authorize ────────────────────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "authorize.html")]
struct AuthorizePage {
    client_id: String,
    redirect_uri: String,
    code_challenge: String,
    code_challenge_method: String,
    response_type: String,
    state: String,
    error: String,
}

impl AuthorizePage {
    fn from_params(params: &HashMap<String, String>, error: String) -> Self {
        let get = |key: &str| params.get(key).cloned().unwrap_or_default();
        Self {
            client_id: get("client_id"),
            redirect_uri: get("redirect_uri"),
            code_challenge: get("code_challenge"),
            code_challenge_method: {
                let m = get("code_challenge_method");
                if m.is_empty() { "S256".to_string() } else { m }
            },
            response_type: {
                let r = get("response_type");
                if r.is_empty() { "code".to_string() } else { r }
            },
            state: get("state"),
            error,
        }
    }
}

#[derive(Template)]
#[template(path = "authorized.html")]
struct AuthorizedPage {
    location: String,
}

async fn authorize_page(Query(params): Query<HashMap<String, String>>) -> Response {
    render(AuthorizePage::from_params(&params, String::new()), StatusCode::OK)
}

async fn authorize_submit(
    State(state): State<OAuthState>,
    remote: RemoteIp,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    match state.service.authorize_submit(&form, &remote.0).await {
        Ok(location) => {
            let page = AuthorizedPage {
                location: location.clone(),
            };
            match page.render() {
                Ok(html) => (
                    StatusCode::FOUND,
                    [(header::LOCATION, location)],
                    Html(html),
                )
                    .into_response(),
                Err(e) => {
                    warn!(error = %e, "authorized page render failed");
                    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
                },
            }
        },
        Err(e) => render(
            AuthorizePage::from_params(&form, e.body.error_description.clone()),
            StatusCode::BAD_REQUEST,
        ),
    }
}

fn render(page: AuthorizePage, status: StatusCode) -> Response {
    match page.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            warn!(error = %e, "authorize page render failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}

// ── Token ────────────────────────────────────────────────────────────────────

async fn token(
    State(state): State<OAuthState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    match state.service.token(&form).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => oauth_error(e),
    }
}

fn oauth_error(error: OAuthError) -> Response {
    (StatusCode::BAD_REQUEST, Json(error.body)).into_response()
}
