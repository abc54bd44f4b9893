//! Entry point used by external API surfaces to submit a task.

use super::balancer::SelectRule;
use super::instance::{Instance, WorkThunk};
use super::registry::InstanceRegistry;
use crate::core::{property, SubmitResult, TaskHandle};
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes a submission to one live instance and enqueues it there.
///
/// The thunk is built only after an instance is chosen, so the deferred
/// upstream call is bound to that account and never transferred.
pub struct Submitter {
    registry: Arc<InstanceRegistry>,
    rule: Arc<dyn SelectRule>,
}

impl Submitter {
    pub fn new(registry: Arc<InstanceRegistry>, rule: Arc<dyn SelectRule>) -> Self {
        Self { registry, rule }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Chooses a live instance, binds the thunk to it and submits.
    pub async fn submit<F>(&self, task: TaskHandle, build_thunk: F) -> SubmitResult
    where
        F: FnOnce(Arc<Instance>) -> WorkThunk,
    {
        let alive = self.registry.alive();
        if alive.is_empty() {
            warn!(task = %task.id(), "no available instance");
            return SubmitResult::failure("no available instance");
        }
        let Some(instance) = self.rule.choose(&alive) else {
            warn!(task = %task.id(), "selection rule returned no instance");
            return SubmitResult::failure("no available instance");
        };

        let channel_id = instance.channel_id();
        debug!(task = %task.id(), channel = %channel_id, "task routed");
        task.set_property(property::DISCORD_INSTANCE_ID, channel_id);

        let thunk = build_thunk(Arc::clone(&instance));
        instance.submit(task, thunk).await
    }
}
