//! Foundation types for the dispatch core.
//!
//! # Domain model
//! - [`Account`]: configuration for one upstream bot connection
//! - [`Task`] / [`TaskHandle`]: the job record and its shared mutable view
//! - [`TaskStatus`]: the lifecycle state machine
//! - [`SubmitResult`]: what API callers get back from a submission
//!
//! # Error handling
//! - [`TaskError`]: illegal state transitions, rejected uniformly with errors

mod account;
mod error;
mod result;
mod task;

pub use account::{Account, MAX_CORE_SIZE};
pub use error::{Result, TaskError};
pub use result::{code, SubmitResult};
pub use task::{property, Task, TaskAction, TaskHandle, TaskStatus};
