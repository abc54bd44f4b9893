use crate::core::TaskError;
use crate::store::StoreError;
use crate::upstream::UpstreamError;
use thiserror::Error;

/// Dispatch-layer error type wrapping collaborator failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("task error: {0}")]
    Task(#[from] TaskError),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
