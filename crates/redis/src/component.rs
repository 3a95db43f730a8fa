use std::{any::Any, sync::Arc};

use async_trait::async_trait;

use {
    axon_common::Result,
    axon_config::RedisConfig,
    axon_registry::{Api, Component},
};

use crate::client::RedisHandle;

/// Namespace name the handle is published under.
pub const NAMESPACE: &str = "redis";

/// Connects to Redis during `initialize` and publishes the handle for every
/// downstream store.
pub struct RedisComponent {
    config: RedisConfig,
}

impl RedisComponent {
    pub fn new(config: RedisConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Component for RedisComponent {
    fn name(&self) -> &str {
        NAMESPACE
    }

    fn load_priority(&self) -> i32 {
        100
    }

    async fn initialize(&self, _api: &Api) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        let handle = RedisHandle::connect(&self.config.url).await?;
        Ok(Some(Arc::new(handle)))
    }
}
