use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use {async_trait::async_trait, redis::AsyncCommands};

use axon_common::{Context, Error, ErrorKind, Result};

use crate::types::{AccessToken, AuthCode, OAuthClient};

/// Persistence for clients, codes, and tokens. `take_code` must delete
/// before returning: an auth code is consumed at most once, and the
/// deletion precedes any validation on it.
#[async_trait]
pub trait OAuthStore: Send + Sync {
    async fn put_client(&self, client: &OAuthClient, ttl: Duration) -> Result<()>;
    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>>;

    async fn put_code(&self, code: &str, record: &AuthCode, ttl: Duration) -> Result<()>;
    async fn take_code(&self, code: &str) -> Result<Option<AuthCode>>;

    async fn put_token(&self, token: &str, record: &AccessToken, ttl: Duration) -> Result<()>;
    async fn get_token(&self, token: &str) -> Result<Option<AccessToken>>;
}

// ── Redis ────────────────────────────────────────────────────────────────────

pub struct RedisOAuthStore {
    redis: axon_redis::RedisHandle,
}

impl RedisOAuthStore {
    pub fn new(redis: axon_redis::RedisHandle) -> Self {
        Self { redis }
    }

    async fn put_json<T: serde::Serialize>(&self, key: String, value: &T, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_string(value)
            .context(ErrorKind::ConnectionServerError, "oauth encode")?;
        let mut conn = self.redis.commands();
        let _: () = conn
            .set_ex(key, raw, ttl.as_secs())
            .await
            .context(ErrorKind::ConnectionServerError, "oauth save")?;
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: String) -> Result<Option<T>> {
        let mut conn = self.redis.commands();
        let raw: Option<String> = conn
            .get(key)
            .await
            .context(ErrorKind::ConnectionServerError, "oauth load")?;
        match raw {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).context(ErrorKind::ConnectionServerError, "oauth decode")?,
            )),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OAuthStore for RedisOAuthStore {
    async fn put_client(&self, client: &OAuthClient, ttl: Duration) -> Result<()> {
        self.put_json(axon_redis::keys::oauth_client(&client.client_id), client, ttl)
            .await
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>> {
        self.get_json(axon_redis::keys::oauth_client(client_id)).await
    }

    async fn put_code(&self, code: &str, record: &AuthCode, ttl: Duration) -> Result<()> {
        self.put_json(axon_redis::keys::oauth_code(code), record, ttl)
            .await
    }

    async fn take_code(&self, code: &str) -> Result<Option<AuthCode>> {
        // GETDEL: fetch and delete in one step, so a concurrent second
        // exchange sees nothing.
        let mut conn = self.redis.commands();
        let raw: Option<String> = conn
            .get_del(axon_redis::keys::oauth_code(code))
            .await
            .context(ErrorKind::ConnectionServerError, "oauth code take")?;
        match raw {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).context(ErrorKind::ConnectionServerError, "oauth decode")?,
            )),
            None => Ok(None),
        }
    }

    async fn put_token(&self, token: &str, record: &AccessToken, ttl: Duration) -> Result<()> {
        self.put_json(axon_redis::keys::oauth_token(token), record, ttl)
            .await
    }

    async fn get_token(&self, token: &str) -> Result<Option<AccessToken>> {
        self.get_json(axon_redis::keys::oauth_token(token)).await
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryOAuthStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryOAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&self, key: String, value: String, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.insert(key, (value, Instant::now() + ttl));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            },
            None => Ok(None),
        }
    }

    fn take(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        match entries.remove(key) {
            Some((value, expires)) if expires > Instant::now() => Ok(Some(value)),
            _ => Ok(None),
        }
    }
}

fn poisoned() -> Error {
    Error::new(ErrorKind::ConnectionServerError, "oauth store poisoned")
}

fn decode<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
    match raw {
        Some(raw) => Ok(Some(
            serde_json::from_str(&raw).context(ErrorKind::ConnectionServerError, "oauth decode")?,
        )),
        None => Ok(None),
    }
}

#[async_trait]
impl OAuthStore for MemoryOAuthStore {
    async fn put_client(&self, client: &OAuthClient, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_string(client)
            .context(ErrorKind::ConnectionServerError, "oauth encode")?;
        self.put(axon_redis::keys::oauth_client(&client.client_id), raw, ttl)
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>> {
        decode(self.get(&axon_redis::keys::oauth_client(client_id))?)
    }

    async fn put_code(&self, code: &str, record: &AuthCode, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_string(record)
            .context(ErrorKind::ConnectionServerError, "oauth encode")?;
        self.put(axon_redis::keys::oauth_code(code), raw, ttl)
    }

    async fn take_code(&self, code: &str) -> Result<Option<AuthCode>> {
        decode(self.take(&axon_redis::keys::oauth_code(code))?)
    }

    async fn put_token(&self, token: &str, record: &AccessToken, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_string(record)
            .context(ErrorKind::ConnectionServerError, "oauth encode")?;
        self.put(axon_redis::keys::oauth_token(token), raw, ttl)
    }

    async fn get_token(&self, token: &str) -> Result<Option<AccessToken>> {
        decode(self.get(&axon_redis::keys::oauth_token(token))?)
    }
}
