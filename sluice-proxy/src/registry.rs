//! Registry of the proxy's server pools.

use std::sync::Arc;

use dashmap::DashMap;
use sluice_core::{ServerPool, SharedPool};
use tokio::sync::Notify;

use crate::config::PoolSection;

/// A pool together with the signal that wakes its rebuild scheduler.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    /// The shared pool.
    pub pool: SharedPool,
    /// Notified when group state changed and a rebuild should run now.
    pub rebuild: Arc<Notify>,
}

impl PoolHandle {
    /// Wrap a pool with a fresh rebuild signal.
    pub fn new(pool: ServerPool) -> Self {
        Self {
            pool: Arc::new(pool),
            rebuild: Arc::new(Notify::new()),
        }
    }

    /// Ask the scheduler to rebuild without waiting for its timer.
    pub fn request_rebuild(&self) {
        self.rebuild.notify_one();
    }
}

/// Lock-free name → pool map shared by the scheduler, prober and stats server.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: DashMap<String, PoolHandle>,
}

impl PoolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one pool per config section, indexed in config order.
    pub fn from_config(sections: &[PoolSection]) -> Self {
        let registry = Self::new();
        for (index, section) in sections.iter().enumerate() {
            let mut pool = ServerPool::new(index as u32, &section.name, section.auto_eject_hosts);
            for group in &section.groups {
                pool.add_group(&group.name, group.servers.clone(), group.weight);
            }
            registry.insert(pool);
        }
        registry
    }

    /// Register a pool, replacing any pool with the same name.
    pub fn insert(&self, pool: ServerPool) -> PoolHandle {
        let handle = PoolHandle::new(pool);
        self.pools
            .insert(handle.pool.name.clone(), handle.clone());
        handle
    }

    /// Look up a pool by name.
    pub fn get(&self, name: &str) -> Option<PoolHandle> {
        self.pools.get(name).map(|entry| entry.value().clone())
    }

    /// All pools, ordered by registry index.
    pub fn handles(&self) -> Vec<PoolHandle> {
        let mut handles: Vec<PoolHandle> = self
            .pools
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        handles.sort_by_key(|h| h.pool.index);
        handles
    }

    /// Number of registered pools.
    pub fn len(&self) -> usize {
        self.pools.len()
    }
}

/// A shared reference to the registry.
pub type SharedRegistry = Arc<PoolRegistry>;
