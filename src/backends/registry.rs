// SPDX-License-Identifier: Apache-2.0

//! Backend Registry
//!
//! Kind-to-implementation mapping built once at startup.
//! New backend kinds plug in through [`BackendRegistry::register`].

use std::collections::HashMap;
use std::sync::Arc;

use queryhub_core::BackendKind;

use super::loki::LokiBackend;
use super::prometheus::PrometheusBackend;
use super::QueryBackend;

/// Registry that holds all available query backends
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Arc<dyn QueryBackend>>,
}

impl BackendRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in Loki and Prometheus backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LokiBackend::new()));
        registry.register(Arc::new(PrometheusBackend::new()));
        registry
    }

    /// Registers a backend
    ///
    /// The backend's `kind()` is used as the key; a later registration replaces
    /// an earlier one for the same kind.
    pub fn register(&mut self, backend: Arc<dyn QueryBackend>) {
        self.backends.insert(backend.kind(), backend);
    }

    /// Gets a backend by kind
    pub fn get(&self, kind: &BackendKind) -> Option<Arc<dyn QueryBackend>> {
        self.backends.get(kind).cloned()
    }

    /// Lists all registered kinds, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.backends.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Returns the number of registered backends
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns true if no backends are registered
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
