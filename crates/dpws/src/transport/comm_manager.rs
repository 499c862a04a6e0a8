// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Communication manager table.
//!
//! Transports are registered by id with a factory at startup; the framework
//! instantiates the ones it needs from its configuration. No dynamic
//! loading.

use super::interface::Transport;
use crate::config::FrameworkConfig;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a transport for a given configuration.
pub type TransportFactory = Arc<dyn Fn(&FrameworkConfig) -> Arc<dyn Transport> + Send + Sync>;

/// Id -> factory table.
#[derive(Default)]
pub struct CommunicationManagerRegistry {
    factories: DashMap<String, TransportFactory>,
}

impl CommunicationManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for `id`.
    pub fn register<F>(&self, id: impl Into<String>, factory: F)
    where
        F: Fn(&FrameworkConfig) -> Arc<dyn Transport> + Send + Sync + 'static,
    {
        let id = id.into();
        log::debug!("[comm-manager] registered '{}'", id);
        self.factories.insert(id, Arc::new(factory));
    }

    /// Register an already built transport under its own id.
    pub fn register_instance(&self, transport: Arc<dyn Transport>) {
        let id = transport.comm_manager_id().to_string();
        self.register(id, move |_: &FrameworkConfig| Arc::clone(&transport));
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.factories.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Build the transport registered under `id`.
    pub fn instantiate(&self, id: &str, config: &FrameworkConfig) -> Result<Arc<dyn Transport>> {
        // Clone the factory out so the shard lock is not held while it runs.
        let factory = self
            .factories
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::Config(format!("unknown communication manager '{}'", id)))?;
        Ok(factory(config))
    }

    /// Build every registered transport.
    pub fn instantiate_all(&self, config: &FrameworkConfig) -> HashMap<String, Arc<dyn Transport>> {
        self.ids()
            .into_iter()
            .filter_map(|id| {
                let transport = self.instantiate(&id, config).ok()?;
                Some((id, transport))
            })
            .collect()
    }
}

impl std::fmt::Debug for CommunicationManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommunicationManagerRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
