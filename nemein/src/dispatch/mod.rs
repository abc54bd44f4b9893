//! The dispatch core: per-account instance runtimes, selection rules, the
//! instance registry and the submission entry point.
//!
//! Each submodule hides one design decision:
//!
//! - [`semaphore`]: how execution slots are counted and released
//! - [`instance`]: the queue/dispatcher/executor machinery per account
//! - [`balancer`]: how one instance is chosen from the live candidates
//! - [`registry`]: how instances are held and enumerated
//! - [`submitter`]: the single entry point external code calls
//!
//! # Data flow
//!
//! ```text
//! submit(task) -> Submitter -> rule.choose(alive instances)
//!              -> Instance::submit(task, thunk) -> dispatcher wakes
//!              -> slot-gated executor -> poll loop -> terminal status
//!              -> persist + notify
//! ```

mod balancer;
mod error;
mod instance;
mod registry;
mod semaphore;
mod submitter;

pub use balancer::{
    BestWaitIdle, InstanceLoad, Random, RoundRobin, RuleKind, SelectRule, Weighted,
};
pub use error::{DispatchError, Result};
pub use instance::{Instance, InstanceConfig, InstanceHandle, ThunkFuture, WorkThunk};
pub use registry::InstanceRegistry;
pub use semaphore::{BoundedSemaphore, Permit};
pub use submitter::Submitter;
