use super::{Result, TaskStore};
use crate::core::Task;
use async_trait::async_trait;
use dashmap::DashMap;

/// In-memory task store backed by a concurrent map.
///
/// Suitable for tests and single-process deployments; records do not
/// survive a restart.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<String, Task>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save(&self, task: &Task) -> Result<()> {
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.tasks.remove(id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.get(id).map(|entry| entry.value().clone()))
    }

    async fn list(&self) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}
