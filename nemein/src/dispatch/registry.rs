//! Registry of instance runtimes, keyed by channel id.

use super::instance::Instance;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Holds shared, long-lived references to every instance runtime.
///
/// Registration and removal are admin operations and use coarse locking;
/// instances never reference the registry back.
#[derive(Default)]
pub struct InstanceRegistry {
    instances: RwLock<HashMap<String, Arc<Instance>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Instance>>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an instance under its channel id, returning the instance
    /// it replaced, if any.
    pub fn register(&self, instance: Arc<Instance>) -> Option<Arc<Instance>> {
        let channel_id = instance.channel_id();
        info!(channel = %channel_id, "registering instance");
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel_id, instance)
    }

    pub fn remove(&self, channel_id: &str) -> Option<Arc<Instance>> {
        let removed = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel_id);
        if removed.is_some() {
            info!(channel = %channel_id, "removed instance");
        }
        removed
    }

    pub fn get(&self, channel_id: &str) -> Option<Arc<Instance>> {
        self.read().get(channel_id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Instance>> {
        let mut instances: Vec<_> = self.read().values().cloned().collect();
        instances.sort_by_key(|instance| instance.channel_id());
        instances
    }

    /// Live selection candidates: enabled accounts, in stable channel-id
    /// order so rule tie-breaking is deterministic.
    pub fn alive(&self) -> Vec<Arc<Instance>> {
        let mut instances: Vec<_> = self
            .read()
            .values()
            .filter(|instance| instance.is_alive())
            .cloned()
            .collect();
        instances.sort_by_key(|instance| instance.channel_id());
        instances
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
