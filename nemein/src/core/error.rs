use super::task::TaskStatus;
use thiserror::Error;

/// Errors produced by the task record itself.
///
/// Status transitions outside the legal set are rejected with an error
/// rather than silently ignored; the caller decides whether to propagate
/// or log. This policy is applied uniformly across the crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaskError {
    /// The task already reached a terminal status and cannot change again.
    #[error("task is already terminal in status {0}")]
    AlreadyTerminal(TaskStatus),

    /// The requested transition is not in the legal transition set.
    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition { from: TaskStatus, to: TaskStatus },
}

pub type Result<T> = std::result::Result<T, TaskError>;
