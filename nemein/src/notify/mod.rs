//! Change notifications for task state transitions.
//!
//! Notification is best-effort: a failing notifier is logged and swallowed
//! by the caller and never affects the task's outcome. The ordering
//! contract (persist first, then notify) is enforced by the instance
//! runtime, not here.

use crate::core::Task;
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),
}

/// Receives a post-change snapshot after every persisted state transition.
/// Implementations must be thread-safe and should not block for long.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn notify_change(&self, task: &Task) -> Result<(), NotifyError>;
}

/// Notifier that only writes a structured log line. Useful as a default
/// when no external transport is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl ChangeNotifier for LogNotifier {
    async fn notify_change(&self, task: &Task) -> Result<(), NotifyError> {
        debug!(
            task = %task.id,
            status = %task.status,
            progress = %task.progress,
            "task change"
        );
        Ok(())
    }
}
