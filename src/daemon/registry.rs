//! Provider adapter registry keyed by provider name.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::adapter::Adapter;

/// Thread-safe map of provider name to adapter.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn Adapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under a provider name.
    pub fn register(&self, name: &str, adapter: Arc<dyn Adapter>) {
        self.adapters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), adapter);
    }

    /// Adapter for a provider name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// All registered provider names, sorted for stable output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .adapters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Number of registered adapters.
    pub fn count(&self) -> usize {
        self.adapters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
