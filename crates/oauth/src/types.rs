use serde::{Deserialize, Serialize};

/// A dynamically registered client, stored at `oauth:client:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub redirect_uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
}

/// Registration request body (RFC 7591 subset).
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationRequest {
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub client_name: Option<String>,
}

/// A single-use authorization code, stored at `oauth:code:{code}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCode {
    pub client_id: String,
    pub user_id: String,
    pub code_challenge: String,
    pub redirect_uri: String,
}

/// A bearer token, stored at `oauth:token:{token}` with the session TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub user_id: String,
    pub client_id: String,
    pub scopes: Vec<String>,
}

/// The `/oauth/token` success response.
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

/// OAuth-standard error body. These endpoints never use the framework's
/// generic envelope.
#[derive(Debug, Clone, Serialize)]
pub struct OAuthErrorBody {
    pub error: &'static str,
    pub error_description: String,
}

#[derive(Debug)]
pub struct OAuthError {
    pub body: OAuthErrorBody,
}

impl OAuthError {
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self {
            body: OAuthErrorBody {
                error: "invalid_request",
                error_description: description.into(),
            },
        }
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self {
            body: OAuthErrorBody {
                error: "invalid_grant",
                error_description: description.into(),
            },
        }
    }

    pub fn unsupported_grant_type(description: impl Into<String>) -> Self {
        Self {
            body: OAuthErrorBody {
                error: "unsupported_grant_type",
                error_description: description.into(),
            },
        }
    }

    pub fn server_error(description: impl Into<String>) -> Self {
        Self {
            body: OAuthErrorBody {
                error: "server_error",
                error_description: description.into(),
            },
        }
    }
}

impl std::fmt::Display for OAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.body.error, self.body.error_description)
    }
}
