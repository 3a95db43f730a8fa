//! OAuth 2.1 authorization server (PKCE S256 only), gating the MCP
//! endpoint: dynamic client registration, the HTML authorize page,
//! single-use codes, and bearer-token issuance.

pub mod pkce;
mod routes;
mod service;
mod store;
mod types;

pub use {
    routes::{OAuthState, router},
    service::OAuthService,
    store::{MemoryOAuthStore, OAuthStore, RedisOAuthStore},
    types::{AccessToken, AuthCode, OAuthClient, OAuthError, RegistrationRequest, TokenResponse},
};
