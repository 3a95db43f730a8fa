use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// The shared namespace components publish into during `initialize`.
///
/// A string-keyed map of component namespaces; values are downcast back to
/// their concrete type by consumers. Cloning hands out another handle to the
/// same map, so the bootstrapper can thread one instance through every
/// component without a process-wide singleton.
#[derive(Clone, Default)]
pub struct Api {
    inner: Arc<RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
}

impl Api {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish<T: Any + Send + Sync>(&self, name: &str, value: T) {
        self.publish_arc(name, Arc::new(value));
    }

    pub fn publish_arc(&self, name: &str, value: Arc<dyn Any + Send + Sync>) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(name.to_string(), value);
        }
    }

    /// Fetch a namespace by name, downcast to its concrete type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let map = self.inner.read().ok()?;
        map.get(name).cloned()?.downcast::<T>().ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().map(|m| m.contains_key(name)).unwrap_or(false)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_and_downcast() {
        let api = Api::new();
        api.publish("answer", 42u64);
        assert_eq!(api.get::<u64>("answer").as_deref(), Some(&42));
        // Wrong type downcasts to None rather than panicking.
        assert!(api.get::<String>("answer").is_none());
        assert!(api.get::<u64>("missing").is_none());
    }
}
