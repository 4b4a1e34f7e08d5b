//! Name -> constructor table for congestion control algorithms.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::congestion::cubic::{self, CubicConfig};
use crate::congestion::Controller;
use crate::error::{CcpError, Result};

/// Produces a fresh, unbound controller.
pub type Constructor = Arc<dyn Fn() -> Box<dyn Controller> + Send + Sync>;

/// Table of registered algorithms.
///
/// Built once at startup and shared by reference; registration is
/// serialized by the internal lock so concurrent attempts are safe.
#[derive(Default)]
pub struct AlgorithmRegistry {
    entries: RwLock<HashMap<String, Constructor>>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in algorithm registered.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        // The registry is empty, so this cannot collide.
        let _ = cubic::register(&registry, CubicConfig::default());
        registry
    }

    /// Register `name`. Fails if it is already present, leaving the
    /// existing entry untouched.
    pub fn register<F>(&self, name: &str, constructor: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Controller> + Send + Sync + 'static,
    {
        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            return Err(CcpError::DuplicateAlgorithm(name.to_string()));
        }
        entries.insert(name.to_string(), Arc::new(constructor));
        tracing::debug!(algorithm = name, "registered congestion control algorithm");
        Ok(())
    }

    /// Names of all registered algorithms, in no particular order.
    pub fn list_registered(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Build a fresh controller for `name`.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn Controller>> {
        // Clone the constructor out so user code never runs under the lock.
        let constructor = self
            .entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CcpError::UnknownAlgorithm(name.to_string()))?;
        Ok(constructor())
    }
}
