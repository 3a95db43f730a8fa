use std::time::{SystemTime, UNIX_EPOCH};

use {http::StatusCode, serde::Serialize, thiserror::Error as ThisError};

/// Every failure the framework can surface, by kind. The kind is the public
/// contract: it deterministically maps to an HTTP status and is serialized
/// verbatim into the wire envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ServerInitialization,
    ServerStart,
    ServerStop,
    ConfigError,
    InitializerValidation,
    ActionValidation,
    TaskValidation,
    ServerValidation,
    ConnectionServerError,
    ConnectionActionRun,
    ConnectionTaskDefinition,
    ConnectionActionNotFound,
    ConnectionActionParamRequired,
    ConnectionActionParamDefault,
    ConnectionActionParamValidation,
    ConnectionActionParamFormatting,
    ConnectionTypeNotFound,
    ConnectionNotSubscribed,
    ConnectionChannelValidation,
    ConnectionChannelAuthorization,
    ConnectionSessionNotFound,
    ConnectionActionTimeout,
    ConnectionRateLimited,
}

impl ErrorKind {
    /// HTTP status this kind maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ConnectionActionNotFound => StatusCode::NOT_FOUND,
            Self::ConnectionActionParamRequired
            | Self::ConnectionActionParamDefault
            | Self::ConnectionActionParamValidation
            | Self::ConnectionActionParamFormatting
            | Self::ConnectionTypeNotFound
            | Self::ConnectionNotSubscribed => StatusCode::NOT_ACCEPTABLE,
            Self::ConnectionChannelValidation => StatusCode::BAD_REQUEST,
            Self::ConnectionChannelAuthorization => StatusCode::FORBIDDEN,
            Self::ConnectionSessionNotFound => StatusCode::UNAUTHORIZED,
            Self::ConnectionActionTimeout => StatusCode::REQUEST_TIMEOUT,
            Self::ConnectionRateLimited => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The wire name (`SCREAMING_SNAKE_CASE`), as serialized into envelopes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerInitialization => "SERVER_INITIALIZATION",
            Self::ServerStart => "SERVER_START",
            Self::ServerStop => "SERVER_STOP",
            Self::ConfigError => "CONFIG_ERROR",
            Self::InitializerValidation => "INITIALIZER_VALIDATION",
            Self::ActionValidation => "ACTION_VALIDATION",
            Self::TaskValidation => "TASK_VALIDATION",
            Self::ServerValidation => "SERVER_VALIDATION",
            Self::ConnectionServerError => "CONNECTION_SERVER_ERROR",
            Self::ConnectionActionRun => "CONNECTION_ACTION_RUN",
            Self::ConnectionTaskDefinition => "CONNECTION_TASK_DEFINITION",
            Self::ConnectionActionNotFound => "CONNECTION_ACTION_NOT_FOUND",
            Self::ConnectionActionParamRequired => "CONNECTION_ACTION_PARAM_REQUIRED",
            Self::ConnectionActionParamDefault => "CONNECTION_ACTION_PARAM_DEFAULT",
            Self::ConnectionActionParamValidation => "CONNECTION_ACTION_PARAM_VALIDATION",
            Self::ConnectionActionParamFormatting => "CONNECTION_ACTION_PARAM_FORMATTING",
            Self::ConnectionTypeNotFound => "CONNECTION_TYPE_NOT_FOUND",
            Self::ConnectionNotSubscribed => "CONNECTION_NOT_SUBSCRIBED",
            Self::ConnectionChannelValidation => "CONNECTION_CHANNEL_VALIDATION",
            Self::ConnectionChannelAuthorization => "CONNECTION_CHANNEL_AUTHORIZATION",
            Self::ConnectionSessionNotFound => "CONNECTION_SESSION_NOT_FOUND",
            Self::ConnectionActionTimeout => "CONNECTION_ACTION_TIMEOUT",
            Self::ConnectionRateLimited => "CONNECTION_RATE_LIMITED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed framework error: a kind plus a human message, optionally carrying
/// the offending parameter key/value and the rendering of a wrapped source.
#[derive(Debug, ThisError)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub key: Option<String>,
    pub value: Option<serde_json::Value>,
    pub original_stack: Option<String>,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            key: None,
            value: None,
            original_stack: None,
        }
    }

    /// Wrap a foreign error, preserving its rendering as the original stack.
    #[must_use]
    pub fn wrap(kind: ErrorKind, source: impl std::fmt::Display) -> Self {
        let rendered = source.to_string();
        Self {
            kind,
            message: rendered.clone(),
            key: None,
            value: None,
            original_stack: Some(rendered),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    /// The HTTP status for this error's kind.
    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// The wire envelope: `{error: {message, type, timestamp, key?, value?, stack?}}`.
    pub fn to_envelope(&self) -> serde_json::Value {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let mut inner = serde_json::json!({
            "message": self.message,
            "type": self.kind.as_str(),
            "timestamp": ts,
        });
        if let Some(key) = &self.key {
            inner["key"] = serde_json::json!(key);
        }
        if let Some(value) = &self.value {
            inner["value"] = value.clone();
        }
        if let Some(stack) = &self.original_stack {
            inner["stack"] = serde_json::json!(stack);
        }
        serde_json::json!({ "error": inner })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Context helpers ──────────────────────────────────────────────────────────

/// `.context(kind, msg)` on `Result` and `Option`, folding the source's
/// rendering into the message.
pub trait Context<T> {
    fn context(self, kind: ErrorKind, context: impl Into<String>) -> Result<T>;
}

impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
    fn context(self, kind: ErrorKind, context: impl Into<String>) -> Result<T> {
        let ctx = context.into();
        self.map_err(|source| {
            let mut err = Error::new(kind, format!("{ctx}: {source}"));
            err.original_stack = Some(source.to_string());
            err
        })
    }
}

impl<T> Context<T> for Option<T> {
    fn context(self, kind: ErrorKind, context: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| Error::new(kind, context.into()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn kind_maps_to_status() {
        assert_eq!(
            ErrorKind::ConnectionActionNotFound.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ErrorKind::ConnectionActionParamRequired.status(),
            StatusCode::NOT_ACCEPTABLE
        );
        assert_eq!(
            ErrorKind::ConnectionRateLimited.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorKind::ServerInitialization.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorKind::ConnectionChannelAuthorization.status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn envelope_carries_key_and_value() {
        let err = Error::new(ErrorKind::ConnectionActionParamRequired, "missing param")
            .with_key("password")
            .with_value(serde_json::json!(null));
        let env = err.to_envelope();
        assert_eq!(env["error"]["type"], "CONNECTION_ACTION_PARAM_REQUIRED");
        assert_eq!(env["error"]["key"], "password");
        assert!(env["error"]["timestamp"].is_u64());
    }

    #[test]
    fn context_wraps_foreign_errors() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::other("boom"));
        let err = res
            .context(ErrorKind::ConnectionServerError, "reading body")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectionServerError);
        assert!(err.message.contains("boom"));
        assert!(err.original_stack.is_some());
    }
}
