use std::{collections::HashMap, sync::Arc, time::Duration};

use {tracing::{debug, info, warn}, url::Url};

use {
    axon_actions::RawParams,
    axon_common::Result,
    axon_config::McpConfig,
    axon_connection::{Connection, ConnectionKind},
    axon_dispatch::Dispatcher,
};

use crate::{
    pkce,
    store::OAuthStore,
    types::{AccessToken, AuthCode, OAuthClient, OAuthError, RegistrationRequest, TokenResponse},
};

/// Auth codes are short-lived and single-use.
const CODE_TTL: Duration = Duration::from_secs(5 * 60);
/// Registered clients persist for a month of inactivity.
const CLIENT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Hosts exempt from the HTTPS redirect-URI requirement.
const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];

/// The authorization server gating the MCP endpoint: dynamic registration,
/// the authorize page, single-use codes, S256 verification, bearer tokens.
pub struct OAuthService {
    store: Arc<dyn OAuthStore>,
    dispatcher: Arc<Dispatcher>,
    config: McpConfig,
    session_ttl: Duration,
    public_origin: Option<String>,
}

impl OAuthService {
    pub fn new(
        store: Arc<dyn OAuthStore>,
        dispatcher: Arc<Dispatcher>,
        config: McpConfig,
        session_ttl: Duration,
        public_origin: Option<String>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
            session_ttl,
            public_origin,
        }
    }

    /// The externally visible origin: configured when behind a proxy,
    /// otherwise derived from the request's Host header.
    pub fn origin(&self, host_header: Option<&str>) -> String {
        if let Some(origin) = &self.public_origin {
            return origin.trim_end_matches('/').to_string();
        }
        match host_header {
            Some(host) => format!("http://{host}"),
            None => "http://localhost".to_string(),
        }
    }

    pub fn protected_resource_metadata(&self, origin: &str) -> serde_json::Value {
        serde_json::json!({
            "resource": origin,
            "authorization_servers": [origin],
        })
    }

    pub fn authorization_server_metadata(&self, origin: &str) -> serde_json::Value {
        serde_json::json!({
            "issuer": origin,
            "authorization_endpoint": format!("{origin}/oauth/authorize"),
            "token_endpoint": format!("{origin}/oauth/token"),
            "registration_endpoint": format!("{origin}/oauth/register"),
            "response_types_supported": ["code"],
            "grant_types_supported": ["authorization_code"],
            "code_challenge_methods_supported": ["S256"],
            "token_endpoint_auth_methods_supported": ["none"],
        })
    }

    // ── Registration ─────────────────────────────────────────────────────

    pub async fn register(
        &self,
        request: RegistrationRequest,
    ) -> std::result::Result<OAuthClient, OAuthError> {
        if request.redirect_uris.is_empty() {
            return Err(OAuthError::invalid_request("redirect_uris is required"));
        }
        for uri in &request.redirect_uris {
            validate_redirect_uri(uri)?;
        }

        let client = OAuthClient {
            client_id: uuid::Uuid::new_v4().to_string(),
            redirect_uris: request.redirect_uris,
            client_name: request.client_name,
            grant_types: vec!["authorization_code".into()],
            response_types: vec!["code".into()],
            token_endpoint_auth_method: "none".into(),
        };
        self.store
            .put_client(&client, CLIENT_TTL)
            .await
            .map_err(|e| OAuthError::server_error(e.message))?;
        info!(client_id = %client.client_id, "oauth client registered");
        Ok(client)
    }

    // ── Authorize ────────────────────────────────────────────────────────

    /// Handle the authorize form submission. On success, returns the
    /// redirect location carrying `code` (and `state` when present).
    pub async fn authorize_submit(
        &self,
        form: &HashMap<String, String>,
        identifier: &str,
    ) -> std::result::Result<String, OAuthError> {
        let client_id = required(form, "client_id")?;
        let redirect_uri = required(form, "redirect_uri")?;
        let code_challenge = required(form, "code_challenge")?;
        let method = form
            .get("code_challenge_method")
            .map(String::as_str)
            .unwrap_or("S256");
        if method != "S256" {
            return Err(OAuthError::invalid_request(
                "code_challenge_method must be S256",
            ));
        }
        if let Some(response_type) = form.get("response_type")
            && response_type != "code"
        {
            return Err(OAuthError::invalid_request("response_type must be code"));
        }

        let client = self
            .store
            .get_client(client_id)
            .await
            .map_err(|e| OAuthError::server_error(e.message))?
            .ok_or_else(|| OAuthError::invalid_request("unknown client"))?;
        if !redirect_matches(&client, redirect_uri) {
            return Err(OAuthError::invalid_request(
                "redirect_uri does not match a registered uri",
            ));
        }

        let user_id = self.authenticate(form, identifier).await?;
        let code = pkce::random_token();
        self.store
            .put_code(
                &code,
                &AuthCode {
                    client_id: client.client_id.clone(),
                    user_id,
                    code_challenge: code_challenge.to_string(),
                    redirect_uri: redirect_uri.to_string(),
                },
                CODE_TTL,
            )
            .await
            .map_err(|e| OAuthError::server_error(e.message))?;
        debug!(client_id = %client.client_id, "auth code minted");

        let mut location = Url::parse(redirect_uri)
            .map_err(|_| OAuthError::invalid_request("redirect_uri is not a valid url"))?;
        location.query_pairs_mut().append_pair("code", &code);
        if let Some(state) = form.get("state").filter(|s| !s.is_empty()) {
            location.query_pairs_mut().append_pair("state", state);
        }
        Ok(location.to_string())
    }

    /// Run the configured login or signup action and pull the user id out
    /// of its response (or the session it populated).
    async fn authenticate(
        &self,
        form: &HashMap<String, String>,
        identifier: &str,
    ) -> std::result::Result<String, OAuthError> {
        let is_signup = form.get("mode").map(String::as_str) == Some("signup");
        let Some(action) = self.auth_action_name(is_signup) else {
            return Err(OAuthError::server_error("no login action configured"));
        };
        let action = action.as_str();

        let mut raw = RawParams::new();
        for (key, value) in form {
            raw.push_text(key.clone(), value.clone());
        }
        let conn = Arc::new(Connection::new(ConnectionKind::Oauth, identifier));
        let result = self
            .dispatcher
            .dispatch(&conn, Some(action), raw, Some("POST"), Some("/oauth/authorize"))
            .await;

        if let Some(error) = result.error {
            warn!(action, error = %error, "oauth authentication failed");
            return Err(OAuthError::invalid_request("authentication failed"));
        }
        if let Some(user_id) = extract_user_id(&result.response) {
            return Ok(user_id);
        }
        if let Some(user_id) = conn.user_id().await {
            return Ok(user_id);
        }
        Err(OAuthError::server_error(
            "login action produced no user id",
        ))
    }

    /// The login/signup action: configured by name, or found by its
    /// definition flag.
    fn auth_action_name(&self, signup: bool) -> Option<String> {
        let configured = if signup {
            &self.config.signup_action
        } else {
            &self.config.login_action
        };
        if let Some(name) = configured {
            return Some(name.clone());
        }
        self.dispatcher
            .actions()
            .all()
            .into_iter()
            .find(|action| {
                let mcp = &action.def().mcp;
                if signup { mcp.is_signup_action } else { mcp.is_login_action }
            })
            .map(|action| action.def().name.clone())
    }

    // ── Token ────────────────────────────────────────────────────────────

    pub async fn token(
        &self,
        form: &HashMap<String, String>,
    ) -> std::result::Result<TokenResponse, OAuthError> {
        match form.get("grant_type").map(String::as_str) {
            Some("authorization_code") => {},
            Some(other) => {
                return Err(OAuthError::unsupported_grant_type(format!(
                    "unsupported grant_type: {other}"
                )));
            },
            None => return Err(OAuthError::invalid_request("grant_type is required")),
        }
        let code = required(form, "code")?;
        let verifier = required(form, "code_verifier")?;

        // Single use: the code is deleted before any validation happens, so
        // a failed exchange burns it.
        let record = self
            .store
            .take_code(code)
            .await
            .map_err(|e| OAuthError::server_error(e.message))?
            .ok_or_else(|| OAuthError::invalid_grant("unknown or used code"))?;

        if let Some(client_id) = form.get("client_id").filter(|v| !v.is_empty())
            && *client_id != record.client_id
        {
            return Err(OAuthError::invalid_grant("client_id mismatch"));
        }
        if let Some(redirect_uri) = form.get("redirect_uri").filter(|v| !v.is_empty())
            && *redirect_uri != record.redirect_uri
        {
            return Err(OAuthError::invalid_grant("redirect_uri mismatch"));
        }
        if !pkce::verify(verifier, &record.code_challenge) {
            return Err(OAuthError::invalid_grant("code_verifier does not match"));
        }

        let token = pkce::random_token();
        self.store
            .put_token(
                &token,
                &AccessToken {
                    user_id: record.user_id,
                    client_id: record.client_id,
                    scopes: Vec::new(),
                },
                self.session_ttl,
            )
            .await
            .map_err(|e| OAuthError::server_error(e.message))?;
        info!("access token issued");

        Ok(TokenResponse {
            access_token: token,
            token_type: "Bearer",
            expires_in: self.session_ttl.as_secs(),
        })
    }

    /// The stored record, or None for unknown/expired tokens.
    pub async fn verify_access_token(&self, token: &str) -> Result<Option<AccessToken>> {
        self.store.get_token(token).await
    }
}

fn required<'a>(
    form: &'a HashMap<String, String>,
    key: &str,
) -> std::result::Result<&'a str, OAuthError> {
    form.get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuthError::invalid_request(format!("{key} is required")))
}

fn extract_user_id(response: &serde_json::Value) -> Option<String> {
    match response.get("userId") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Registration rules: parseable, no fragment, no userinfo, HTTPS unless
/// loopback.
fn validate_redirect_uri(uri: &str) -> std::result::Result<(), OAuthError> {
    let parsed = Url::parse(uri)
        .map_err(|_| OAuthError::invalid_request(format!("invalid redirect uri: {uri}")))?;
    if parsed.fragment().is_some() {
        return Err(OAuthError::invalid_request(
            "redirect uris must not carry a fragment",
        ));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(OAuthError::invalid_request(
            "redirect uris must not carry userinfo",
        ));
    }
    let host = parsed.host_str().unwrap_or_default();
    let loopback = LOOPBACK_HOSTS.contains(&host) || host == "::1";
    if parsed.scheme() != "https" && !loopback {
        return Err(OAuthError::invalid_request(
            "redirect uris must use https",
        ));
    }
    Ok(())
}

/// Submitted redirect must match a registered uri by origin and path;
/// query strings may differ.
fn redirect_matches(client: &OAuthClient, submitted: &str) -> bool {
    let Ok(submitted) = Url::parse(submitted) else {
        return false;
    };
    client.redirect_uris.iter().any(|registered| {
        Url::parse(registered).is_ok_and(|registered| {
            registered.origin() == submitted.origin() && registered.path() == submitted.path()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OAuthClient;

    fn client_with(uris: &[&str]) -> OAuthClient {
        OAuthClient {
            client_id: "c1".into(),
            redirect_uris: uris.iter().map(|s| s.to_string()).collect(),
            client_name: None,
            grant_types: vec!["authorization_code".into()],
            response_types: vec!["code".into()],
            token_endpoint_auth_method: "none".into(),
        }
    }

    #[test]
    fn redirect_uri_rules() {
        assert!(validate_redirect_uri("https://app.example.com/cb").is_ok());
        assert!(validate_redirect_uri("http://localhost:9999/cb").is_ok());
        assert!(validate_redirect_uri("http://127.0.0.1/cb").is_ok());
        assert!(validate_redirect_uri("http://app.example.com/cb").is_err());
        assert!(validate_redirect_uri("https://app.example.com/cb#frag").is_err());
        assert!(validate_redirect_uri("https://user:pw@app.example.com/cb").is_err());
        assert!(validate_redirect_uri("not a url").is_err());
    }

    #[test]
    fn redirect_matching_ignores_query() {
        let client = client_with(&["http://localhost:9999/cb"]);
        assert!(redirect_matches(&client, "http://localhost:9999/cb"));
        assert!(redirect_matches(&client, "http://localhost:9999/cb?extra=1"));
        assert!(!redirect_matches(&client, "http://localhost:9999/other"));
        assert!(!redirect_matches(&client, "http://localhost:8888/cb"));
        assert!(!redirect_matches(&client, "https://localhost:9999/cb"));
    }
}
