use std::sync::{Arc, OnceLock};

use {async_trait::async_trait, regex::Regex};

use {
    axon_common::{Error, ErrorKind, Result},
    axon_connection::Connection,
};

/// Channel names (and subscribe/unsubscribe requests) must match this shape.
const NAME_PATTERN: &str = "^[A-Za-z0-9:._-]{1,200}$";

pub fn validate_channel_name(name: &str) -> Result<()> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(NAME_PATTERN).ok());
    if re.as_ref().is_some_and(|re| re.is_match(name)) {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::ConnectionChannelValidation,
            format!("invalid channel name: '{name}'"),
        )
        .with_value(serde_json::Value::String(name.to_string())))
    }
}

// ── Authorization seams ──────────────────────────────────────────────────────

/// Decides whether a connection may subscribe to a channel. Runs after the
/// channel's middleware chain.
#[async_trait]
pub trait ChannelAuthorizer: Send + Sync {
    async fn authorize(&self, channel: &str, conn: &Arc<Connection>) -> Result<bool>;
}

/// Default authorizer: everyone may subscribe.
pub struct AllowAll;

#[async_trait]
impl ChannelAuthorizer for AllowAll {
    async fn authorize(&self, _channel: &str, _conn: &Arc<Connection>) -> Result<bool> {
        Ok(true)
    }
}

/// Per-channel middleware, run in order before the authorizer. A typed
/// error aborts the subscription.
#[async_trait]
pub trait ChannelMiddleware: Send + Sync {
    fn name(&self) -> &str;

    async fn run_before(&self, _channel: &str, _conn: &Arc<Connection>) -> Result<()> {
        Ok(())
    }
}

// ── Definition ───────────────────────────────────────────────────────────────

type PresenceKeyFn = Box<dyn Fn(&Connection) -> String + Send + Sync>;

/// A registered channel: a literal name or a pattern where a `*` segment
/// matches any one segment (`room:*` matches `room:1`).
pub struct ChannelDef {
    pub name: String,
    pub description: String,
    pub middleware: Vec<Arc<dyn ChannelMiddleware>>,
    pub authorizer: Arc<dyn ChannelAuthorizer>,
    presence_key: PresenceKeyFn,
}

impl ChannelDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            middleware: Vec::new(),
            authorizer: Arc::new(AllowAll),
            presence_key: Box::new(|conn| conn.id.clone()),
        }
    }

    #[must_use]
    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<dyn ChannelMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn ChannelAuthorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Override the presence key derivation (default: the connection id).
    /// Applications key presence by user id so one user with three sockets
    /// shows up once.
    #[must_use]
    pub fn with_presence_key(
        mut self,
        f: impl Fn(&Connection) -> String + Send + Sync + 'static,
    ) -> Self {
        self.presence_key = Box::new(f);
        self
    }

    pub fn presence_key(&self, conn: &Connection) -> String {
        (self.presence_key)(conn)
    }

    /// Literal equality, or per-segment match where `*` is a wildcard.
    pub fn matches(&self, name: &str) -> bool {
        if !self.name.contains('*') {
            return self.name == name;
        }
        let pattern: Vec<&str> = self.name.split(':').collect();
        let parts: Vec<&str> = name.split(':').collect();
        pattern.len() == parts.len()
            && pattern
                .iter()
                .zip(&parts)
                .all(|(p, part)| *p == "*" || p == part)
    }
}

/// Ordered channel definitions; lookup returns the first match.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Vec<Arc<ChannelDef>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: ChannelDef) {
        self.channels.push(Arc::new(def));
    }

    pub fn find(&self, name: &str) -> Option<Arc<ChannelDef>> {
        self.channels.iter().find(|c| c.matches(name)).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn name_validation() {
        assert!(validate_channel_name("room:1").is_ok());
        assert!(validate_channel_name("a.b-c_d:9").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("bad channel").is_err());
        assert!(validate_channel_name(&"x".repeat(201)).is_err());
        let err = validate_channel_name("no/slashes").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectionChannelValidation);
    }

    #[test]
    fn pattern_matching_by_segment() {
        let def = ChannelDef::new("room:*");
        assert!(def.matches("room:1"));
        assert!(def.matches("room:lobby"));
        assert!(!def.matches("room:1:private"));
        assert!(!def.matches("other:1"));

        let literal = ChannelDef::new("announcements");
        assert!(literal.matches("announcements"));
        assert!(!literal.matches("announcements:2"));
    }

    #[test]
    fn registry_returns_first_match() {
        let mut registry = ChannelRegistry::new();
        registry.register(ChannelDef::new("room:lobby").describe("the lobby"));
        registry.register(ChannelDef::new("room:*").describe("any room"));

        let lobby = registry.find("room:lobby").expect("lobby matches");
        assert_eq!(lobby.description, "the lobby");
        let other = registry.find("room:7").expect("pattern matches");
        assert_eq!(other.description, "any room");
        assert!(registry.find("nope").is_none());
    }
}
