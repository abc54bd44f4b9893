//! Nemein: multi-account dispatch core for generative-image chat bots.
//!
//! `nemein` (νέμειν, Greek for "to distribute" or "to allot") fans
//! user-submitted image jobs out across a pool of upstream bot accounts.
//! For each job it picks an account through a pluggable selection rule,
//! queues the job on that account's instance, executes up to a bounded
//! number of jobs concurrently per account, polls every in-flight job
//! until it terminates and persists plus notifies every state change.
//!
//! # Features
//!
//! - **Per-account FIFO**: each account owns its queue; jobs are admitted
//!   in submission order
//! - **Bounded concurrency**: a counting gate caps in-flight executions
//!   per account
//! - **Pluggable balancing**: best-wait-idle, round-robin, random and
//!   weighted selection rules
//! - **Observable lifecycle**: every status transition is persisted and
//!   then notified, in that order
//! - **Explicit lifecycle**: dispatchers are started and shut down through
//!   handles; nothing spawns from a constructor
//!
//! # Quick start
//!
//! ```ignore
//! use nemein::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(InMemoryTaskStore::new());
//!     let notifier = Arc::new(LogNotifier);
//!     let client: Arc<dyn BotClient> = connect_account().await;
//!
//!     let instance = Instance::new(
//!         Account::new("chan-1").with_core_size(4),
//!         client,
//!         store,
//!         notifier,
//!     );
//!     let handle = instance.start();
//!
//!     let registry = Arc::new(InstanceRegistry::new());
//!     registry.register(Arc::clone(&instance));
//!
//!     let submitter = Submitter::new(registry, RuleKind::BestWaitIdle.build());
//!     let task = TaskHandle::new(Task::new(new_task_id(), TaskAction::Imagine));
//!     let result = submitter
//!         .submit(task.clone(), |instance| {
//!             let prompt = "a fox in watercolor".to_string();
//!             let nonce = task.nonce();
//!             Box::new(move || Box::pin(async move {
//!                 instance.imagine(&prompt, &nonce).await
//!             }))
//!         })
//!         .await;
//!     println!("{}: {}", result.code, result.description);
//!
//!     handle.shutdown().await;
//! }
//! ```
//!
//! # Module organization
//!
//! - [`core`]: account and task records, the status state machine, submit
//!   results
//! - [`upstream`]: the consumed bot-client interface
//! - [`store`]: the consumed task-store interface and an in-memory impl
//! - [`notify`]: the consumed change-notifier interface
//! - [`dispatch`]: instance runtime, selection rules, registry, submitter

pub mod core;
pub mod dispatch;
pub mod notify;
pub mod store;
pub mod upstream;

pub use crate::core::{
    code, property, Account, SubmitResult, Task, TaskAction, TaskError, TaskHandle, TaskStatus,
    MAX_CORE_SIZE,
};
pub use dispatch::{
    BestWaitIdle, BoundedSemaphore, DispatchError, Instance, InstanceConfig, InstanceHandle,
    InstanceLoad, InstanceRegistry, Permit, Random, RoundRobin, RuleKind, SelectRule, Submitter,
    Weighted, WorkThunk,
};
pub use notify::{ChangeNotifier, LogNotifier, NotifyError};
pub use store::{InMemoryTaskStore, StoreError, TaskStore};
pub use upstream::{new_nonce, BlendDimensions, BotClient, Message, UpstreamError};

/// Fresh task identifier.
pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Prelude module for convenient glob imports.
///
/// ```ignore
/// use nemein::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{
        code, property, Account, SubmitResult, Task, TaskAction, TaskHandle, TaskStatus,
    };
    pub use crate::dispatch::{
        Instance, InstanceConfig, InstanceHandle, InstanceRegistry, RuleKind, SelectRule,
        Submitter, WorkThunk,
    };
    pub use crate::notify::{ChangeNotifier, LogNotifier};
    pub use crate::store::{InMemoryTaskStore, TaskStore};
    pub use crate::upstream::{new_nonce, BotClient, Message};
    pub use crate::new_task_id;
    pub use std::sync::Arc;
}
