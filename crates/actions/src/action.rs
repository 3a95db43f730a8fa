use std::{pin::Pin, sync::Arc};

use {
    async_trait::async_trait,
    futures::Future,
    http::Method,
    tokio_util::sync::CancellationToken,
};

use {
    axon_common::Result,
    axon_connection::Connection,
};

use crate::schema::{InputSchema, Params};

// ── Routing ──────────────────────────────────────────────────────────────────

/// An HTTP binding: a method plus a literal route or a pattern with `:name`
/// capture segments.
#[derive(Debug, Clone)]
pub struct WebRoute {
    pub method: Method,
    pub route: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Capture(String),
}

impl WebRoute {
    pub fn new(method: Method, route: impl Into<String>) -> Self {
        let route = route.into();
        let segments = route
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Capture(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        Self {
            method,
            route,
            segments,
        }
    }

    /// Match a request path, returning the ordered captures on success.
    pub fn matches(&self, method: &Method, path: &str) -> Option<Vec<(String, String)>> {
        if *method != self.method {
            return None;
        }
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut captures = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {},
                Segment::Literal(_) => return None,
                Segment::Capture(name) => {
                    captures.push((name.clone(), part.to_string()));
                },
            }
        }
        Some(captures)
    }
}

// ── Definition ───────────────────────────────────────────────────────────────

/// Scheduled enqueue of an action onto a background queue.
#[derive(Debug, Clone)]
pub struct TaskSchedule {
    pub frequency_ms: u64,
    pub queue: String,
}

#[derive(Debug, Clone, Default)]
pub struct McpOptions {
    pub enabled: bool,
    pub is_login_action: bool,
    pub is_signup_action: bool,
}

/// A named unit of work: registered at initialize, immutable thereafter.
#[derive(Debug, Clone)]
pub struct ActionDef {
    pub name: String,
    pub description: String,
    pub input: InputSchema,
    /// Ordered middleware names, resolved at registration.
    pub middleware: Vec<String>,
    pub web: Option<WebRoute>,
    pub task: Option<TaskSchedule>,
    /// None inherits the configured default; Some(0) disables the timeout.
    pub timeout_ms: Option<u64>,
    pub mcp: McpOptions,
}

impl ActionDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input: InputSchema::new(),
            middleware: Vec::new(),
            web: None,
            task: None,
            timeout_ms: None,
            mcp: McpOptions::default(),
        }
    }

    #[must_use]
    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    #[must_use]
    pub fn input(mut self, schema: InputSchema) -> Self {
        self.input = schema;
        self
    }

    #[must_use]
    pub fn middleware(mut self, names: &[&str]) -> Self {
        self.middleware = names.iter().map(|n| n.to_string()).collect();
        self
    }

    #[must_use]
    pub fn web(mut self, method: Method, route: impl Into<String>) -> Self {
        self.web = Some(WebRoute::new(method, route));
        self
    }

    #[must_use]
    pub fn task(mut self, frequency_ms: u64, queue: impl Into<String>) -> Self {
        self.task = Some(TaskSchedule {
            frequency_ms,
            queue: queue.into(),
        });
        self
    }

    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    #[must_use]
    pub fn mcp(mut self, options: McpOptions) -> Self {
        self.mcp = options;
        self
    }
}

// ── The action trait ─────────────────────────────────────────────────────────

#[async_trait]
pub trait Action: Send + Sync {
    fn def(&self) -> &ActionDef;

    /// The implementation. `cancel` fires when the per-action timeout
    /// elapses; long-running I/O must observe it.
    async fn run(
        &self,
        params: &Params,
        conn: &Arc<Connection>,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value>;
}

// ── Closure-backed actions ───────────────────────────────────────────────────

type BoxedHandler = Box<
    dyn Fn(
            Params,
            Arc<Connection>,
            CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// An action backed by a boxed async closure. Builtins and tests use this;
/// substantial actions implement [`Action`] directly.
pub struct FnAction {
    def: ActionDef,
    handler: BoxedHandler,
}

impl FnAction {
    pub fn new<F, Fut>(def: ActionDef, handler: F) -> Self
    where
        F: Fn(Params, Arc<Connection>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        Self {
            def,
            handler: Box::new(move |params, conn, cancel| {
                Box::pin(handler(params, conn, cancel))
            }),
        }
    }
}

#[async_trait]
impl Action for FnAction {
    fn def(&self) -> &ActionDef {
        &self.def
    }

    async fn run(
        &self,
        params: &Params,
        conn: &Arc<Connection>,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value> {
        (self.handler)(params.clone(), Arc::clone(conn), cancel).await
    }
}
