//! Persistence interface for task records.
//!
//! The dispatch core only needs upsert-by-id and delete on its hot path;
//! `get` and `list` exist for admin surfaces. Real backends live outside
//! this crate; [`InMemoryTaskStore`] is the reference implementation used
//! in tests and single-process deployments.

use crate::core::Task;
use async_trait::async_trait;
use thiserror::Error;

mod memory;

pub use memory::InMemoryTaskStore;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Task record storage. Implementations must be thread-safe.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Upsert by task id.
    async fn save(&self, task: &Task) -> Result<()>;

    /// Delete by id; deleting an unknown id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Task>>;

    async fn list(&self) -> Result<Vec<Task>>;
}
