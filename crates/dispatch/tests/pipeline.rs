#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Pipeline semantics, end to end: lookup, validation, middleware order,
//! timeout cancellation, secret redaction in the per-call log record.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use {async_trait::async_trait, tokio_util::sync::CancellationToken};

use {
    axon_actions::{
        Action, ActionDef, ActionMiddleware, ActionRegistry, Field, FnAction, MiddlewareRegistry,
        Params, RawParams,
    },
    axon_common::{Error, ErrorKind, Result},
    axon_connection::{Connection, ConnectionKind},
    axon_dispatch::Dispatcher,
    axon_sessions::{MemorySessionStore, SessionManager},
};

fn user_create() -> FnAction {
    FnAction::new(
        ActionDef::new("user:create")
            .describe("create a user")
            .input(
                axon_actions::InputSchema::new()
                    .field("name", Field::string())
                    .field("email", Field::string())
                    .field("password", Field::string().secret()),
            ),
        |params: Params, _conn, _cancel: CancellationToken| async move {
            Ok(serde_json::json!({ "created": params["name"] }))
        },
    )
}

struct Harness {
    dispatcher: Dispatcher,
}

impl Harness {
    /// Middleware first, then the actions that reference it.
    fn build(configure: impl FnOnce(&mut MiddlewareRegistry) -> Vec<Arc<dyn Action>>) -> Self {
        let mut middleware = MiddlewareRegistry::new();
        let action_list = configure(&mut middleware);
        let mut actions = ActionRegistry::new(Arc::new(middleware));
        for action in action_list {
            actions.register(action).unwrap();
        }

        let sessions = Arc::new(SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            axon_config::SessionConfig::default(),
        ));
        Self {
            dispatcher: Dispatcher::new(Arc::new(actions), sessions, 30_000),
        }
    }

    fn conn(&self) -> Arc<Connection> {
        Arc::new(Connection::new(ConnectionKind::Test, "127.0.0.1"))
    }
}

fn raw(pairs: &[(&str, &str)]) -> RawParams {
    let mut params = RawParams::new();
    for (k, v) in pairs {
        params.push_text(*k, *v);
    }
    params
}

#[tokio::test]
async fn unknown_action_is_not_found() {
    let h = Harness::build(|_| vec![Arc::new(user_create())]);
    let conn = h.conn();

    let result = h
        .dispatcher
        .dispatch(&conn, Some("nonexistent"), RawParams::new(), Some("POST"), None)
        .await;
    let error = result.error.expect("should fail");
    assert_eq!(error.kind, ErrorKind::ConnectionActionNotFound);
    assert_eq!(error.status().as_u16(), 404);

    let absent = h
        .dispatcher
        .dispatch(&conn, None, RawParams::new(), None, None)
        .await;
    assert_eq!(
        absent.error.unwrap().kind,
        ErrorKind::ConnectionActionNotFound
    );
}

#[tokio::test]
async fn missing_required_param_names_the_key() {
    let h = Harness::build(|_| vec![Arc::new(user_create())]);

    let result = h
        .dispatcher
        .dispatch(
            &h.conn(),
            Some("user:create"),
            raw(&[("name", "t"), ("email", "t@t")]),
            Some("POST"),
            Some("/api/user"),
        )
        .await;

    let error = result.error.expect("should fail");
    assert_eq!(error.kind, ErrorKind::ConnectionActionParamRequired);
    assert_eq!(error.status().as_u16(), 406);
    assert_eq!(error.key.as_deref(), Some("password"));
}

#[tokio::test]
async fn session_loads_once_and_stays_loaded() {
    let h = Harness::build(|_| vec![Arc::new(user_create())]);
    let conn = h.conn();
    assert!(!conn.session_loaded());

    let params = raw(&[("name", "t"), ("email", "t@t"), ("password", "x")]);
    h.dispatcher
        .dispatch(&conn, Some("user:create"), params.clone(), None, None)
        .await;
    assert!(conn.session_loaded());
    let first = conn.session().await.unwrap();

    h.dispatcher
        .dispatch(&conn, Some("user:create"), params, None, None)
        .await;
    let second = conn.session().await.unwrap();
    assert_eq!(first.created_at, second.created_at);
}

// ── Middleware ───────────────────────────────────────────────────────────────

struct TraceMiddleware {
    name: String,
    trace: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ActionMiddleware for TraceMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_before(&self, _params: &Params, _conn: &Arc<Connection>) -> Result<Option<Params>> {
        self.trace.lock().unwrap().push(format!("before:{}", self.name));
        Ok(None)
    }

    async fn run_after(
        &self,
        _params: &Params,
        _response: &serde_json::Value,
        _conn: &Arc<Connection>,
    ) -> Result<Option<serde_json::Value>> {
        self.trace.lock().unwrap().push(format!("after:{}", self.name));
        Ok(None)
    }
}

struct StampMiddleware;

#[async_trait]
impl ActionMiddleware for StampMiddleware {
    fn name(&self) -> &str {
        "stamp"
    }

    async fn run_before(&self, params: &Params, _conn: &Arc<Connection>) -> Result<Option<Params>> {
        let mut updated = params.clone();
        updated.insert("stamped".into(), serde_json::json!(true));
        Ok(Some(updated))
    }

    async fn run_after(
        &self,
        _params: &Params,
        response: &serde_json::Value,
        _conn: &Arc<Connection>,
    ) -> Result<Option<serde_json::Value>> {
        let mut wrapped = serde_json::Map::new();
        wrapped.insert("wrapped".into(), response.clone());
        Ok(Some(serde_json::Value::Object(wrapped)))
    }
}

struct RejectMiddleware;

#[async_trait]
impl ActionMiddleware for RejectMiddleware {
    fn name(&self) -> &str {
        "reject"
    }

    async fn run_before(&self, _params: &Params, _conn: &Arc<Connection>) -> Result<Option<Params>> {
        Err(Error::new(
            ErrorKind::ConnectionChannelAuthorization,
            "nope",
        ))
    }
}

#[tokio::test]
async fn middleware_brackets_run_in_registration_order() {
    let trace: Arc<Mutex<Vec<String>>> = Arc::default();
    let t1 = Arc::clone(&trace);
    let t2 = Arc::clone(&trace);
    let t3 = Arc::clone(&trace);

    let h = Harness::build(move |middleware| {
        middleware.register(Arc::new(TraceMiddleware {
            name: "one".into(),
            trace: t1,
        }));
        middleware.register(Arc::new(TraceMiddleware {
            name: "two".into(),
            trace: t2,
        }));
        vec![Arc::new(FnAction::new(
            ActionDef::new("traced").middleware(&["one", "two"]),
            move |_params: Params, _conn, _cancel: CancellationToken| {
                let trace = Arc::clone(&t3);
                async move {
                    trace.lock().unwrap().push("run".into());
                    Ok(serde_json::json!({}))
                }
            },
        ))]
    });

    let result = h
        .dispatcher
        .dispatch(&h.conn(), Some("traced"), RawParams::new(), None, None)
        .await;
    assert!(result.error.is_none());
    assert_eq!(
        trace.lock().unwrap().clone(),
        vec!["before:one", "before:two", "run", "after:one", "after:two"]
    );
}

#[tokio::test]
async fn middleware_replaces_params_and_response() {
    let h = Harness::build(|middleware| {
        middleware.register(Arc::new(StampMiddleware));
        vec![Arc::new(FnAction::new(
            ActionDef::new("echo").middleware(&["stamp"]),
            |params: Params, _conn, _cancel: CancellationToken| async move {
                Ok(serde_json::Value::Object(params))
            },
        ))]
    });

    let result = h
        .dispatcher
        .dispatch(&h.conn(), Some("echo"), RawParams::new(), None, None)
        .await;
    assert!(result.error.is_none());
    assert_eq!(result.response["wrapped"]["stamped"], true);
}

#[tokio::test]
async fn before_middleware_error_aborts_dispatch() {
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_inner = Arc::clone(&ran);
    let h = Harness::build(move |middleware| {
        middleware.register(Arc::new(RejectMiddleware));
        vec![Arc::new(FnAction::new(
            ActionDef::new("guarded").middleware(&["reject"]),
            move |_params: Params, _conn, _cancel: CancellationToken| {
                let ran = Arc::clone(&ran_inner);
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::json!({}))
                }
            },
        ))]
    });

    let result = h
        .dispatcher
        .dispatch(&h.conn(), Some("guarded"), RawParams::new(), None, None)
        .await;
    assert_eq!(
        result.error.unwrap().kind,
        ErrorKind::ConnectionChannelAuthorization
    );
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

// ── Timeout ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn timeout_cancels_the_token_and_reports_408() {
    let (cancelled_tx, mut cancelled_rx) = tokio::sync::mpsc::unbounded_channel();
    let h = Harness::build(move |_| {
        let tx = cancelled_tx.clone();
        vec![Arc::new(FnAction::new(
            ActionDef::new("slow").timeout_ms(50),
            move |_params: Params, _conn, cancel: CancellationToken| {
                let tx = tx.clone();
                async move {
                    tokio::select! {
                        () = tokio::time::sleep(std::time::Duration::from_millis(500)) => {
                            Ok(serde_json::json!({ "finished": true }))
                        },
                        () = cancel.cancelled() => {
                            let _ = tx.send(());
                            Err(Error::new(ErrorKind::ConnectionActionRun, "cancelled"))
                        },
                    }
                }
            },
        ))]
    });

    let result = h
        .dispatcher
        .dispatch(&h.conn(), Some("slow"), RawParams::new(), None, None)
        .await;
    let error = result.error.expect("should time out");
    assert_eq!(error.kind, ErrorKind::ConnectionActionTimeout);
    assert_eq!(error.status().as_u16(), 408);

    // The run observed the cancellation.
    cancelled_rx.recv().await.expect("cancellation observed");
}

#[tokio::test]
async fn zero_timeout_disables_the_race() {
    let h = Harness::build(|_| {
        vec![Arc::new(FnAction::new(
            ActionDef::new("steady").timeout_ms(0),
            |_params: Params, _conn, _cancel: CancellationToken| async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(serde_json::json!({ "ok": true }))
            },
        ))]
    });

    let result = h
        .dispatcher
        .dispatch(&h.conn(), Some("steady"), RawParams::new(), None, None)
        .await;
    assert!(result.error.is_none());
    assert_eq!(result.response["ok"], true);
}

// ── Logging ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn log_record_redacts_secret_params() {
    let sink = axon_logger::CollectingSink::new();
    let subscriber = axon_logger::build_subscriber(
        &axon_config::LoggerConfig {
            level: "info".into(),
            format: "json".into(),
            colorize: false,
        },
        Arc::new(sink.clone()),
    );
    let guard = tracing::subscriber::set_default(subscriber);

    let h = Harness::build(|_| vec![Arc::new(user_create())]);
    let result = h
        .dispatcher
        .dispatch(
            &h.conn(),
            Some("user:create"),
            raw(&[("name", "t"), ("email", "t@t"), ("password", "hunter2")]),
            Some("POST"),
            Some("/api/user"),
        )
        .await;
    assert!(result.error.is_none());
    drop(guard);

    let record = sink
        .lines()
        .into_iter()
        .find(|l| l.contains("\"action\""))
        .expect("one dispatch record");
    assert!(record.contains("[[secret]]"));
    assert!(!record.contains("hunter2"));
    assert!(record.contains("\"status\":\"OK\""));
}
