use std::collections::HashSet;

use tracing::{debug, info, warn};

use axon_common::{Error, ErrorKind, Result};

use crate::{
    api::Api,
    component::{Component, RunMode},
};

/// Orders registered components by their numeric priorities and drives the
/// initialize → start → stop phases.
///
/// Lifecycle methods are called serially by the process owner; everything
/// else in the framework may run concurrently around them.
pub struct Registry {
    components: Vec<Box<dyn Component>>,
    api: Api,
    initialized: HashSet<String>,
    started: bool,
    restarting: bool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            api: Api::new(),
            initialized: HashSet::new(),
            started: false,
            restarting: false,
        }
    }

    /// Register a component. The framework-builtin set goes in first; user
    /// components append afterwards. Execution order is by priority only.
    pub fn register(&mut self, component: Box<dyn Component>) {
        self.components.push(component);
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    /// Run `initialize` on every component not yet initialized, ascending
    /// `load_priority`. The first failure aborts the phase.
    pub async fn initialize(&mut self) -> Result<()> {
        let order = self.ordered(|c| c.load_priority());
        for idx in order {
            self.initialize_one(idx).await?;
        }
        Ok(())
    }

    /// Run `start` ascending `start_priority`, skipping components whose
    /// `run_modes` excludes `mode`. Initializes implicitly where needed.
    pub async fn start(&mut self, mode: RunMode) -> Result<()> {
        let order = self.ordered(|c| c.start_priority());
        for idx in order {
            if !self.components[idx].run_modes().contains(&mode) {
                debug!(
                    component = self.components[idx].name(),
                    ?mode,
                    "skipping start: mode not supported"
                );
                continue;
            }
            self.initialize_one(idx).await?;
            let component = &self.components[idx];
            debug!(component = component.name(), "starting");
            component
                .start(&self.api, mode)
                .await
                .map_err(|e| phase_error(ErrorKind::ServerStart, component.name(), e))?;
        }
        self.started = true;
        info!(?mode, components = self.components.len(), "started");
        Ok(())
    }

    /// Run `stop` ascending `stop_priority`. Idempotent after success.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        let order = self.ordered(|c| c.stop_priority());
        for idx in order {
            let component = &self.components[idx];
            debug!(component = component.name(), "stopping");
            component
                .stop(&self.api)
                .await
                .map_err(|e| phase_error(ErrorKind::ServerStop, component.name(), e))?;
        }
        self.started = false;
        info!("stopped");
        Ok(())
    }

    /// Stop then start. Overlapping calls are a no-op for the second caller.
    pub async fn restart(&mut self, mode: RunMode) -> Result<()> {
        if self.restarting {
            warn!("restart already in progress, ignoring");
            return Ok(());
        }
        self.restarting = true;
        let result = async {
            self.stop().await?;
            self.start(mode).await
        }
        .await;
        self.restarting = false;
        result
    }

    async fn initialize_one(&mut self, idx: usize) -> Result<()> {
        let name = self.components[idx].name().to_string();
        if self.initialized.contains(&name) {
            return Ok(());
        }
        debug!(component = %name, "initializing");
        let namespace = self.components[idx]
            .initialize(&self.api)
            .await
            .map_err(|e| phase_error(ErrorKind::ServerInitialization, &name, e))?;
        if let Some(value) = namespace {
            self.api.publish_arc(&name, value);
        }
        self.initialized.insert(name);
        Ok(())
    }

    fn ordered(&self, priority: impl Fn(&dyn Component) -> i32) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.components.len()).collect();
        order.sort_by_key(|i| priority(self.components[*i].as_ref()));
        order
    }
}

fn phase_error(kind: ErrorKind, component: &str, source: Error) -> Error {
    let mut err = Error::new(kind, format!("{component}: {}", source.message));
    err.original_stack = source.original_stack.or(Some(source.message));
    err
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::{
        any::Any,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;

    use super::*;

    type Trace = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: String,
        load: i32,
        start: i32,
        stop: i32,
        modes: Vec<RunMode>,
        fail_start: bool,
        trace: Trace,
    }

    impl Recorder {
        fn new(name: &str, trace: &Trace) -> Self {
            Self {
                name: name.into(),
                load: 100,
                start: 100,
                stop: 100,
                modes: vec![RunMode::Server, RunMode::Cli],
                fail_start: false,
                trace: Arc::clone(trace),
            }
        }
    }

    #[async_trait]
    impl Component for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn load_priority(&self) -> i32 {
            self.load
        }

        fn start_priority(&self) -> i32 {
            self.start
        }

        fn stop_priority(&self) -> i32 {
            self.stop
        }

        fn run_modes(&self) -> &[RunMode] {
            &self.modes
        }

        async fn initialize(&self, _api: &Api) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
            self.trace.lock().unwrap().push(format!("init:{}", self.name));
            Ok(Some(Arc::new(self.name.clone())))
        }

        async fn start(&self, _api: &Api, _mode: RunMode) -> Result<()> {
            if self.fail_start {
                return Err(Error::new(ErrorKind::ConnectionServerError, "boom"));
            }
            self.trace.lock().unwrap().push(format!("start:{}", self.name));
            Ok(())
        }

        async fn stop(&self, _api: &Api) -> Result<()> {
            self.trace.lock().unwrap().push(format!("stop:{}", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn phases_run_in_priority_order() {
        let trace: Trace = Arc::default();
        let mut reg = Registry::new();

        let mut a = Recorder::new("a", &trace);
        a.load = 200;
        a.start = 10;
        let mut b = Recorder::new("b", &trace);
        b.load = 100;
        b.start = 20;
        reg.register(Box::new(a));
        reg.register(Box::new(b));

        reg.initialize().await.unwrap();
        reg.start(RunMode::Server).await.unwrap();

        let events = trace.lock().unwrap().clone();
        assert_eq!(events, vec!["init:b", "init:a", "start:a", "start:b"]);
    }

    #[tokio::test]
    async fn start_skips_components_outside_mode() {
        let trace: Trace = Arc::default();
        let mut reg = Registry::new();

        let mut server_only = Recorder::new("web", &trace);
        server_only.modes = vec![RunMode::Server];
        reg.register(Box::new(server_only));
        reg.register(Box::new(Recorder::new("both", &trace)));

        reg.start(RunMode::Cli).await.unwrap();

        let events = trace.lock().unwrap().clone();
        assert!(!events.contains(&"start:web".to_string()));
        assert!(events.contains(&"start:both".to_string()));
        // Implicit initialize happened only for the started component.
        assert!(!events.contains(&"init:web".to_string()));
    }

    #[tokio::test]
    async fn start_publishes_namespaces() {
        let trace: Trace = Arc::default();
        let mut reg = Registry::new();
        reg.register(Box::new(Recorder::new("redis", &trace)));
        reg.start(RunMode::Server).await.unwrap();
        assert_eq!(
            reg.api().get::<String>("redis").as_deref(),
            Some(&"redis".to_string())
        );
    }

    #[tokio::test]
    async fn start_failure_aborts_phase_with_typed_error() {
        let trace: Trace = Arc::default();
        let mut reg = Registry::new();

        let mut failing = Recorder::new("bad", &trace);
        failing.fail_start = true;
        failing.start = 10;
        let mut late = Recorder::new("late", &trace);
        late.start = 20;
        reg.register(Box::new(failing));
        reg.register(Box::new(late));

        let err = reg.start(RunMode::Server).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerStart);
        assert!(err.message.contains("bad"));
        let events = trace.lock().unwrap().clone();
        assert!(!events.contains(&"start:late".to_string()));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let trace: Trace = Arc::default();
        let mut reg = Registry::new();
        reg.register(Box::new(Recorder::new("a", &trace)));

        reg.start(RunMode::Server).await.unwrap();
        reg.stop().await.unwrap();
        reg.stop().await.unwrap();

        let stops = trace
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with("stop:"))
            .count();
        assert_eq!(stops, 1);
    }

    #[tokio::test]
    async fn initialize_runs_once() {
        let trace: Trace = Arc::default();
        let mut reg = Registry::new();
        reg.register(Box::new(Recorder::new("a", &trace)));

        reg.initialize().await.unwrap();
        reg.start(RunMode::Server).await.unwrap();

        let inits = trace
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with("init:"))
            .count();
        assert_eq!(inits, 1);
    }
}
