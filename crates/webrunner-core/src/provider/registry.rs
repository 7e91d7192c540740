//! Provider registry
//!
//! Process-wide map from Strategy tag (and name) to a shared provider
//! instance. Reads take a short lock to snapshot; registration takes a short
//! write lock. Health probes run against a snapshot, never under a lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{Health, Provider};
use crate::selector::Strategy;

/// Registry of shared provider singletons.
#[derive(Default)]
pub struct ProviderRegistry {
    by_strategy: RwLock<HashMap<Strategy, Arc<dyn Provider>>>,
    by_name: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for a strategy tag. Registering a second provider
    /// for the same tag replaces the first; the previous provider is returned
    /// for disposal by the caller.
    pub fn register(
        &self,
        strategy: Strategy,
        provider: Arc<dyn Provider>,
    ) -> Option<Arc<dyn Provider>> {
        let name = provider.name().to_string();
        let previous = {
            let mut map = self.by_strategy.write().expect("registry lock poisoned");
            map.insert(strategy, provider.clone())
        };
        {
            let mut names = self.by_name.write().expect("registry lock poisoned");
            if let Some(old) = &previous {
                names.remove(old.name());
            }
            names.insert(name, provider);
        }
        if previous.is_some() {
            tracing::debug!(strategy = %strategy, "provider registration replaced prior provider");
        }
        previous
    }

    /// Provider registered for a strategy tag.
    pub fn get(&self, strategy: Strategy) -> Option<Arc<dyn Provider>> {
        self.by_strategy
            .read()
            .expect("registry lock poisoned")
            .get(&strategy)
            .cloned()
    }

    /// Provider registered under a name.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.by_name
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Snapshot of all registered (strategy, provider) pairs.
    pub fn all(&self) -> Vec<(Strategy, Arc<dyn Provider>)> {
        self.by_strategy
            .read()
            .expect("registry lock poisoned")
            .iter()
            .map(|(strategy, provider)| (*strategy, provider.clone()))
            .collect()
    }

    /// Strategies with a registered provider.
    pub fn strategies(&self) -> Vec<Strategy> {
        self.by_strategy
            .read()
            .expect("registry lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Probe every registered provider; the lock is released before the
    /// first probe runs.
    pub async fn health_all(&self) -> HashMap<String, Health> {
        let snapshot = self.all();
        let mut out = HashMap::with_capacity(snapshot.len());
        for (_, provider) in snapshot {
            let health = provider.health_check().await;
            out.insert(provider.name().to_string(), health);
        }
        out
    }
}
