use std::{any::Any, sync::Arc};

use async_trait::async_trait;

use axon_common::Result;

use crate::api::Api;

/// Which process modes a component participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Server,
    Cli,
}

pub const ALL_MODES: &[RunMode] = &[RunMode::Server, RunMode::Cli];

/// A lifecycle participant.
///
/// Phases run in ascending priority order, one phase at a time:
/// `initialize` populates the shared [`Api`] namespace, `start` brings up
/// runtime work (servers, timers, subscribers), `stop` tears it down.
/// Components that only matter to a long-lived server narrow `run_modes`.
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    fn load_priority(&self) -> i32 {
        100
    }

    fn start_priority(&self) -> i32 {
        100
    }

    fn stop_priority(&self) -> i32 {
        100
    }

    fn run_modes(&self) -> &[RunMode] {
        ALL_MODES
    }

    /// Runs once per process. The returned value, if any, is published into
    /// the namespace under this component's name.
    async fn initialize(&self, _api: &Api) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        Ok(None)
    }

    async fn start(&self, _api: &Api, _mode: RunMode) -> Result<()> {
        Ok(())
    }

    async fn stop(&self, _api: &Api) -> Result<()> {
        Ok(())
    }
}
