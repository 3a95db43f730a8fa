use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tokio::sync::Mutex,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use {
    axon_common::{Error, ErrorKind, Result},
    axon_config::TasksConfig,
    axon_dispatch::Dispatcher,
    axon_registry::{Api, Component, RunMode},
};

use crate::queue::{LocalQueue, TaskQueue};

pub const NAMESPACE: &str = "tasks";

/// Enqueues every action carrying a task declaration on its frequency.
///
/// The queue defaults to the in-process [`LocalQueue`]; a durable queue
/// library plugs in through [`SchedulerComponent::with_queue`].
pub struct SchedulerComponent {
    config: TasksConfig,
    custom_queue: Mutex<Option<Arc<dyn TaskQueue>>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl SchedulerComponent {
    pub fn new(config: TasksConfig) -> Self {
        Self {
            config,
            custom_queue: Mutex::new(None),
            cancel: Mutex::new(None),
        }
    }

    pub fn with_queue(self, queue: Arc<dyn TaskQueue>) -> Self {
        if let Ok(mut slot) = self.custom_queue.try_lock() {
            *slot = Some(queue);
        }
        self
    }
}

#[async_trait]
impl Component for SchedulerComponent {
    fn name(&self) -> &str {
        NAMESPACE
    }

    fn load_priority(&self) -> i32 {
        500
    }

    fn start_priority(&self) -> i32 {
        500
    }

    fn stop_priority(&self) -> i32 {
        500
    }

    fn run_modes(&self) -> &[RunMode] {
        &[RunMode::Server]
    }

    async fn start(&self, api: &Api, _mode: RunMode) -> Result<()> {
        if !self.config.enabled {
            debug!("task scheduler disabled");
            return Ok(());
        }
        let dispatcher = api
            .get::<Dispatcher>(axon_dispatch::NAMESPACE)
            .ok_or_else(|| Error::new(ErrorKind::ServerStart, "dispatcher not initialized"))?;
        let queue = match self.custom_queue.lock().await.clone() {
            Some(queue) => queue,
            None => Arc::new(LocalQueue::new(
                Arc::clone(&dispatcher),
                self.config.queues.clone(),
            )),
        };

        let cancel = CancellationToken::new();
        for action in dispatcher.actions().scheduled() {
            let def = action.def();
            let Some(task) = def.task.clone() else {
                continue;
            };
            let name = def.name.clone();
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            debug!(action = %name, frequency_ms = task.frequency_ms, queue = %task.queue, "task scheduled");
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_millis(task.frequency_ms));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // The first tick fires immediately; skip it so the cadence
                // starts one period from now.
                interval.tick().await;
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        _ = interval.tick() => {
                            if let Err(e) = queue
                                .enqueue(&name, serde_json::json!({}), &task.queue)
                                .await
                            {
                                warn!(action = %name, error = %e, "task enqueue failed");
                            }
                        },
                    }
                }
            });
        }
        *self.cancel.lock().await = Some(cancel);
        Ok(())
    }

    async fn stop(&self, _api: &Api) -> Result<()> {
        if let Some(cancel) = self.cancel.lock().await.take() {
            cancel.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio_util::sync::CancellationToken as Token;

    use {
        axon_actions::{ActionDef, ActionRegistry, FnAction, MiddlewareRegistry, Params},
        axon_sessions::{MemorySessionStore, SessionManager},
    };

    use super::*;

    struct CountingQueue {
        count: AtomicUsize,
    }

    #[async_trait]
    impl TaskQueue for CountingQueue {
        async fn enqueue(
            &self,
            _action: &str,
            _params: serde_json::Value,
            queue: &str,
        ) -> Result<()> {
            assert_eq!(queue, "default");
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dispatcher_with_tick() -> Arc<Dispatcher> {
        let mut actions = ActionRegistry::new(Arc::new(MiddlewareRegistry::new()));
        actions
            .register(Arc::new(FnAction::new(
                ActionDef::new("tick").task(1_000, "default"),
                |_params: Params, _conn, _cancel: Token| async { Ok(serde_json::json!({})) },
            )))
            .unwrap();
        Arc::new(Dispatcher::new(
            Arc::new(actions),
            Arc::new(SessionManager::new(
                Arc::new(MemorySessionStore::new()),
                axon_config::SessionConfig::default(),
            )),
            30_000,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_enqueues_on_frequency() {
        let api = Api::new();
        api.publish_arc(axon_dispatch::NAMESPACE, dispatcher_with_tick());

        let queue = Arc::new(CountingQueue {
            count: AtomicUsize::new(0),
        });
        let scheduler = SchedulerComponent::new(TasksConfig::default())
            .with_queue(Arc::clone(&queue) as Arc<dyn TaskQueue>);
        scheduler.start(&api, RunMode::Server).await.unwrap();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        scheduler.stop(&api).await.unwrap();
        let seen = queue.count.load(Ordering::SeqCst);
        assert!((3..=4).contains(&seen), "expected ~3 enqueues, saw {seen}");
    }
}
