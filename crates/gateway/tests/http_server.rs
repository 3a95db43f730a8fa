#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests over a live server: action routing, sessions,
//! rate-limit headers, CORS and security headers, and the OAuth → MCP
//! path.

use std::{net::SocketAddr, sync::Arc};

use tokio_util::sync::CancellationToken;

use {
    axon_actions::{ActionDef, Field, FieldKind, FnAction, InputSchema, Params},
    axon_config::AppConfig,
    axon_gateway::{App, ServerState},
    axon_registry::{Registry, RunMode},
};

fn test_config(extra: serde_json::Value) -> AppConfig {
    let mut overrides = serde_json::json!({
        "process": { "name": "testapp" },
        "server": { "web": { "bind": "127.0.0.1", "port": 0 } },
        "tasks": { "enabled": false },
    });
    axon_common::deep_merge(&mut overrides, &extra);
    axon_config::resolve_with(Some(overrides)).unwrap()
}

fn user_create() -> Arc<FnAction> {
    Arc::new(FnAction::new(
        ActionDef::new("user:create")
            .web(http::Method::POST, "/user")
            .input(
                InputSchema::new()
                    .field("name", Field::string())
                    .field("email", Field::string())
                    .field("password", Field::string().secret()),
            ),
        |params: Params, _conn, _cancel: CancellationToken| async move {
            Ok(serde_json::json!({ "created": params["name"] }))
        },
    ))
}

struct TestServer {
    registry: Registry,
    addr: SocketAddr,
}

impl TestServer {
    async fn start(config: AppConfig, configure: impl FnOnce(App) -> App) -> Self {
        let app = configure(App::new(config).in_memory());
        let mut registry = app.into_registry();
        registry.start(RunMode::Server).await.unwrap();
        let state = registry
            .api()
            .get::<ServerState>("web")
            .expect("server state published");
        let addr = state.bound_addr().expect("listener bound");
        Self { registry, addr }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn routes_actions_and_maps_errors() {
    let server = TestServer::start(test_config(serde_json::json!({})), |app| {
        app.action(user_create())
    })
    .await;
    let http = client();

    // Unknown action route.
    let resp = http
        .post(server.url("/api/nonexistent"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "CONNECTION_ACTION_NOT_FOUND");

    // Missing required param.
    let resp = http
        .post(server.url("/api/user"))
        .json(&serde_json::json!({ "name": "t", "email": "t@t" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 406);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "CONNECTION_ACTION_PARAM_REQUIRED");
    assert_eq!(body["error"]["key"], "password");

    // Success.
    let resp = http
        .post(server.url("/api/user"))
        .json(&serde_json::json!({ "name": "t", "email": "t@t", "password": "hunter2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["created"], "t");

    // Builtin status action.
    let resp = http.get(server.url("/api/status")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["name"], "testapp");
}

#[tokio::test]
async fn session_cookie_roundtrips() {
    let counter = Arc::new(FnAction::new(
        ActionDef::new("counter").web(http::Method::GET, "/counter"),
        |_params: Params, conn, _cancel: CancellationToken| async move {
            let current = conn
                .session()
                .await
                .and_then(|s| s.data.get("count").and_then(|v| v.as_u64()))
                .unwrap_or(0);
            conn.update_session(&serde_json::json!({ "count": current + 1 }))
                .await?;
            Ok(serde_json::json!({ "count": current + 1 }))
        },
    ));
    let server = TestServer::start(test_config(serde_json::json!({})), move |app| {
        app.action(counter)
    })
    .await;
    let http = client();

    let resp = http.get(server.url("/api/counter")).send().await.unwrap();
    let cookie = resp
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .expect("session cookie set")
        .to_string();
    assert!(cookie.starts_with("axon_session="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 1);

    // Echo the cookie: the same session continues.
    let pair = cookie.split(';').next().unwrap().to_string();
    let resp = http
        .get(server.url("/api/counter"))
        .header("cookie", &pair)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn rate_limit_headers_then_429() {
    let limited = Arc::new(FnAction::new(
        ActionDef::new("limited")
            .web(http::Method::GET, "/limited")
            .middleware(&["rate-limit"]),
        |_params: Params, _conn, _cancel: CancellationToken| async move {
            Ok(serde_json::json!({ "ok": true }))
        },
    ));
    let config = test_config(serde_json::json!({
        "rate_limit": { "unauthenticated_limit": 5, "window_ms": 60000 },
    }));
    let server = TestServer::start(config, move |app| app.action(limited)).await;
    let http = client();

    let mut remaining = Vec::new();
    for _ in 0..5 {
        let resp = http.get(server.url("/api/limited")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        remaining.push(
            resp.headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .unwrap()
                .to_string(),
        );
    }
    assert_eq!(remaining, vec!["4", "3", "2", "1", "0"]);

    let resp = http.get(server.url("/api/limited")).send().await.unwrap();
    assert_eq!(resp.status(), 429);
    let retry: u64 = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry));
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "CONNECTION_RATE_LIMITED");
}

#[tokio::test]
async fn list_params_agree_across_ingress_styles() {
    let echo = Arc::new(FnAction::new(
        ActionDef::new("echo")
            .web(http::Method::POST, "/echo")
            .input(InputSchema::new().field("k", Field::list_of(FieldKind::Integer))),
        |params: Params, _conn, _cancel: CancellationToken| async move {
            Ok(serde_json::Value::Object(params))
        },
    ));
    let server = TestServer::start(test_config(serde_json::json!({})), move |app| {
        app.action(echo)
    })
    .await;
    let http = client();
    let expected = serde_json::json!([1, 2]);

    let from_json: serde_json::Value = http
        .post(server.url("/api/echo"))
        .json(&serde_json::json!({ "k": [1, 2] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(from_json["k"], expected);

    let from_query: serde_json::Value = http
        .post(server.url("/api/echo?k=1&k=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(from_query["k"], expected);

    let from_form: serde_json::Value = http
        .post(server.url("/api/echo"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("k=1&k=2")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(from_form["k"], expected);
}

#[tokio::test]
async fn security_and_cors_headers() {
    let server = TestServer::start(
        test_config(serde_json::json!({
            "server": { "web": { "allowed_origins": ["https://app.example.com"] } },
        })),
        |app| app,
    )
    .await;
    let http = client();

    let resp = http.get(server.url("/api/status")).send().await.unwrap();
    let headers = resp.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers.get("content-security-policy").is_some());
    assert!(headers.get("strict-transport-security").is_some());
    assert!(headers.get("referrer-policy").is_some());
    // Non-wildcard config and no Origin header: no CORS origin at all.
    assert!(headers.get("access-control-allow-origin").is_none());

    // Allowed origin is echoed with credentials.
    let resp = http
        .get(server.url("/api/status"))
        .header("origin", "https://app.example.com")
        .send()
        .await
        .unwrap();
    let headers = resp.headers();
    assert_eq!(
        headers.get("access-control-allow-origin").unwrap(),
        "https://app.example.com"
    );
    assert_eq!(headers.get("vary").unwrap(), "Origin");
    assert_eq!(
        headers.get("access-control-allow-credentials").unwrap(),
        "true"
    );

    // Refused origin gets nothing back.
    let resp = http
        .get(server.url("/api/status"))
        .header("origin", "https://evil.example.com")
        .send()
        .await
        .unwrap();
    assert!(resp.headers().get("access-control-allow-origin").is_none());

    // Preflight.
    let resp = http
        .request(reqwest::Method::OPTIONS, server.url("/api/status"))
        .header("origin", "https://app.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().get("access-control-allow-methods").is_some());
}

#[tokio::test]
async fn unhandled_well_known_is_404_without_action_routing() {
    let server = TestServer::start(test_config(serde_json::json!({})), |app| app).await;
    let resp = client()
        .get(server.url("/.well-known/whatever"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert!(resp.bytes().await.unwrap().is_empty());
}

// ── OAuth + MCP over HTTP ────────────────────────────────────────────────────

fn login_action() -> Arc<FnAction> {
    Arc::new(FnAction::new(
        ActionDef::new("session:create").input(
            InputSchema::new()
                .field("email", Field::string())
                .field("password", Field::string().secret()),
        ),
        |params: Params, _conn, _cancel: CancellationToken| async move {
            if params["password"] == "hunter2" {
                Ok(serde_json::json!({ "userId": "u-1" }))
            } else {
                Err(axon_common::Error::new(
                    axon_common::ErrorKind::ConnectionSessionNotFound,
                    "bad credentials",
                ))
            }
        },
    ))
}

#[tokio::test]
async fn oauth_gates_the_mcp_endpoint() {
    let config = test_config(serde_json::json!({
        "server": { "mcp": { "enabled": true, "login_action": "session:create" } },
    }));
    let server = TestServer::start(config, |app| app.action(login_action())).await;
    let http = client();

    // Metadata documents exist at the origin.
    let resp = http
        .get(server.url("/.well-known/oauth-authorization-server"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let meta: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(meta["code_challenge_methods_supported"], serde_json::json!(["S256"]));

    // No bearer: 401 with a pointer at the resource metadata.
    let resp = http.get(server.url("/mcp")).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let challenge = resp
        .headers()
        .get("www-authenticate")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(challenge.contains("oauth-protected-resource"));

    // Register a client.
    let resp = http
        .post(server.url("/oauth/register"))
        .json(&serde_json::json!({ "redirect_uris": ["http://localhost:9999/cb"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let registered: serde_json::Value = resp.json().await.unwrap();
    let client_id = registered["client_id"].as_str().unwrap().to_string();

    // The authorize page renders with the echoed hidden fields.
    let resp = http
        .get(server.url(&format!(
            "/oauth/authorize?client_id={client_id}&redirect_uri=http://localhost:9999/cb&code_challenge=x&code_challenge_method=S256&response_type=code&state=S"
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let page = resp.text().await.unwrap();
    assert!(page.contains("code_challenge"));
    assert!(page.contains(&client_id));

    // Submit credentials; capture the redirect.
    let challenge = axon_oauth::pkce::challenge_for("verifier-xyz");
    let resp = http
        .post(server.url("/oauth/authorize"))
        .form(&[
            ("client_id", client_id.as_str()),
            ("redirect_uri", "http://localhost:9999/cb"),
            ("code_challenge", challenge.as_str()),
            ("code_challenge_method", "S256"),
            ("response_type", "code"),
            ("state", "S"),
            ("mode", "login"),
            ("email", "t@t"),
            ("password", "hunter2"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 302);
    let location = resp
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(location.starts_with("http://localhost:9999/cb?"));
    assert!(location.contains("state=S"));
    let code = url::Url::parse(&location)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    // Exchange the code.
    let token_form = [
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("code_verifier", "verifier-xyz"),
    ];
    let resp = http
        .post(server.url("/oauth/token"))
        .form(&token_form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let token: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(token["token_type"], "Bearer");
    let access_token = token["access_token"].as_str().unwrap().to_string();

    // The bearer opens the MCP endpoint.
    let resp = http
        .get(server.url("/mcp"))
        .bearer_auth(&access_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let tools: serde_json::Value = resp.json().await.unwrap();
    let names: Vec<&str> = tools["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"status"));

    let resp = http
        .post(server.url("/mcp"))
        .bearer_auth(&access_token)
        .json(&serde_json::json!({ "tool": "status", "arguments": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let call: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(call["response"]["name"], "testapp");

    // The code was single-use.
    let resp = http
        .post(server.url("/oauth/token"))
        .form(&token_form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(err["error"], "invalid_grant");
}

#[tokio::test]
async fn stop_is_clean_without_sockets() {
    let mut server = TestServer::start(test_config(serde_json::json!({})), |app| app).await;
    let url = server.url("/api/status");
    assert!(client().get(&url).send().await.unwrap().status().is_success());

    server.registry.stop().await.unwrap();
    assert!(client().get(&url).send().await.is_err());
}
