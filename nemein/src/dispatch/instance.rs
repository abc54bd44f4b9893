//! Per-account execution unit: pending queue, dispatcher loop, bounded
//! concurrent executor and the lifecycle poll loop.
//!
//! One [`Instance`] exclusively owns one [`Account`] and everything queued
//! on it. Tasks flow through three containers:
//!
//! - the FIFO pending queue, appended by [`Instance::submit`] and drained
//!   by the dispatcher;
//! - the running set, entered by an executor once it holds an execution
//!   slot and left when the task reaches a terminal status;
//! - the future map, tracking the spawned executor for each admitted task.
//!
//! A task id is in at most one of queue/running at any moment, and in
//! neither after it terminates.
//!
//! The dispatcher reserves an execution slot *before* it takes an entry
//! out of the queue, so the observable queue depth always reflects real
//! admission pressure. The reserved permit travels into the spawned
//! executor and is dropped in its final cleanup: one reservation, one
//! release.

use super::balancer::InstanceLoad;
use super::error::Result;
use super::semaphore::{BoundedSemaphore, Permit};
use crate::core::{code, property, Account, SubmitResult, Task, TaskHandle};
use crate::notify::ChangeNotifier;
use crate::store::TaskStore;
use crate::upstream::{self, BlendDimensions, BotClient, Message};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Future produced by a work thunk.
pub type ThunkFuture = Pin<Box<dyn Future<Output = upstream::Result<Message>> + Send>>;

/// Deferred upstream call bound to a specific account at enqueue time.
/// Invoked exactly once by the executor that admits the task.
pub type WorkThunk = Box<dyn FnOnce() -> ThunkFuture + Send>;

struct QueuedTask {
    task: TaskHandle,
    thunk: WorkThunk,
}

/// Timing knobs for the dispatcher and executor loops.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// How long one timed slot-acquisition attempt waits before re-checking
    /// for shutdown.
    pub admit_wait: Duration,
    /// Grace period after the upstream accepts a job, giving it time to
    /// attach the correlating message id before the first report.
    pub first_delay: Duration,
    /// Interval between poll-loop samples of an in-flight task.
    pub poll_interval: Duration,
    /// Upper bound on how long a task may stay in-flight before it is
    /// failed with reason `"timeout"`. `None` polls until a terminal
    /// status arrives from the upstream.
    pub poll_timeout: Option<Duration>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            admit_wait: Duration::from_millis(100),
            first_delay: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            poll_timeout: None,
        }
    }
}

/// The per-account execution unit.
///
/// Construction wires the collaborators but does not start any background
/// work; call [`Instance::start`] to launch the dispatcher and hold on to
/// the returned [`InstanceHandle`] for shutdown.
pub struct Instance {
    account: RwLock<Account>,
    config: InstanceConfig,
    /// Effective concurrency, fixed at construction.
    core_size: u32,
    client: Arc<dyn BotClient>,
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn ChangeNotifier>,
    queue: Mutex<VecDeque<QueuedTask>>,
    running: DashMap<String, TaskHandle>,
    futures: DashMap<String, JoinHandle<()>>,
    semaphore: BoundedSemaphore,
    work_signal: Notify,
}

impl Instance {
    pub fn new(
        account: Account,
        client: Arc<dyn BotClient>,
        store: Arc<dyn TaskStore>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Arc<Self> {
        Self::with_config(account, InstanceConfig::default(), client, store, notifier)
    }

    pub fn with_config(
        account: Account,
        config: InstanceConfig,
        client: Arc<dyn BotClient>,
        store: Arc<dyn TaskStore>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Arc<Self> {
        let core_size = account.effective_core_size();
        if core_size != account.core_size {
            warn!(
                channel = %account.channel_id,
                configured = account.core_size,
                effective = core_size,
                "core size clamped"
            );
        }
        Arc::new(Self {
            core_size,
            config,
            client,
            store,
            notifier,
            queue: Mutex::new(VecDeque::new()),
            running: DashMap::new(),
            futures: DashMap::new(),
            semaphore: BoundedSemaphore::new(core_size as usize),
            work_signal: Notify::new(),
            account: RwLock::new(account),
        })
    }

    fn account_read(&self) -> std::sync::RwLockReadGuard<'_, Account> {
        self.account.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_guard(&self) -> MutexGuard<'_, VecDeque<QueuedTask>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Channel id of the owned account; doubles as the instance id.
    pub fn channel_id(&self) -> String {
        self.account_read().channel_id.clone()
    }

    /// Owned copy of the account configuration.
    pub fn account(&self) -> Account {
        self.account_read().clone()
    }

    /// Whether this instance is a selection candidate.
    pub fn is_alive(&self) -> bool {
        self.account_read().enabled
    }

    /// Toggles the account in or out of the selection pool. Queued and
    /// running work is unaffected.
    pub fn set_enabled(&self, enabled: bool) {
        self.account
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled = enabled;
    }

    /// Effective concurrent-execution capacity.
    pub fn core_size(&self) -> u32 {
        self.core_size
    }

    pub fn queue_len(&self) -> usize {
        self.queue_guard().len()
    }

    /// Load sample consumed by the selection rules.
    pub fn load(&self) -> InstanceLoad {
        InstanceLoad {
            core_size: self.core_size,
            running: self.futures.len(),
            queued: self.queue_len(),
            weight: self.account_read().weight,
        }
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Persists the task and appends it to the pending queue.
    ///
    /// Returns `SUCCESS` ("submitted") when the queue was empty and a slot
    /// was free, `IN_QUEUE` with the position otherwise. If the entry
    /// cannot be accepted after the record was persisted, the record is
    /// deleted again so admission stays atomic from the caller's view.
    pub async fn submit(&self, task: TaskHandle, thunk: WorkThunk) -> SubmitResult {
        let snapshot = task.snapshot();
        if let Err(e) = self.store.save(&snapshot).await {
            warn!(
                channel = %self.channel_id(),
                task = %snapshot.id,
                error = %e,
                "failed to persist task at admission"
            );
            return SubmitResult::failure(format!("failed to persist task: {}", e))
                .with_property(property::DISCORD_INSTANCE_ID, self.channel_id());
        }

        match self.enqueue(task, thunk) {
            Ok(result) => result,
            Err(rejection) => {
                if let Err(e) = self.store.delete(&snapshot.id).await {
                    warn!(
                        task = %snapshot.id,
                        error = %e,
                        "failed to delete rejected task"
                    );
                }
                rejection
            }
        }
    }

    /// Appends to the queue and signals the dispatcher. `Err` means the
    /// entry was not enqueued and the caller must roll back the persisted
    /// record.
    fn enqueue(
        &self,
        task: TaskHandle,
        thunk: WorkThunk,
    ) -> std::result::Result<SubmitResult, SubmitResult> {
        let task_id = task.id();
        let channel_id = self.channel_id();
        let max_queue = self.account_read().queue_size;

        let ahead = {
            let mut queue = self.queue_guard();
            let ahead = queue.len();
            if max_queue > 0 && ahead >= max_queue {
                return Err(SubmitResult::failure_with(
                    code::QUEUE_REJECTED,
                    "queue is full",
                )
                .with_property(property::DISCORD_INSTANCE_ID, channel_id));
            }
            queue.push_back(QueuedTask { task, thunk });
            ahead
        };
        // Always signal after the append; the dispatcher's clear-after-drain
        // stays safe because the signal is level-triggered.
        self.work_signal.notify_one();

        let result = if ahead == 0 && self.semaphore.available() > 0 {
            SubmitResult::submitted(task_id)
        } else {
            info!(channel = %channel_id, task = %task_id, ahead, "task queued");
            SubmitResult::in_queue(ahead)
        };
        Ok(result.with_property(property::DISCORD_INSTANCE_ID, channel_id))
    }

    /// Drops the execution handle, persists and notifies the task's current
    /// snapshot and removes any matching entry from the pending queue.
    ///
    /// Callers cancelling a still-queued task drive the record to a
    /// terminal status first, then call this.
    pub async fn exit_task(&self, task: &TaskHandle) {
        let task_id = task.id();
        if self.futures.remove(&task_id).is_some() {
            debug!(task = %task_id, "dropped execution handle");
        }
        if let Err(e) = self.save_and_notify(task).await {
            warn!(task = %task_id, error = %e, "failed to persist task on exit");
        }
        self.queue_guard()
            .retain(|entry| entry.task.id() != task_id);
    }

    // ------------------------------------------------------------------
    // Read-only snapshots
    // ------------------------------------------------------------------

    pub fn running_tasks(&self) -> Vec<Task> {
        self.running
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    pub fn queue_tasks(&self) -> Vec<Task> {
        self.queue_guard()
            .iter()
            .map(|entry| entry.task.snapshot())
            .collect()
    }

    /// Ids of tasks with a live executor.
    pub fn running_futures(&self) -> Vec<String> {
        self.futures.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn find_running<P>(&self, predicate: P) -> Option<TaskHandle>
    where
        P: Fn(&Task) -> bool,
    {
        self.running
            .iter()
            .find(|entry| predicate(&entry.value().snapshot()))
            .map(|entry| entry.value().clone())
    }

    pub fn get_running_by_nonce(&self, nonce: &str) -> Option<TaskHandle> {
        self.find_running(|task| task.nonce == nonce)
    }

    pub fn get_running_by_message_id(&self, message_id: &str) -> Option<TaskHandle> {
        self.find_running(|task| task.message_id == message_id)
    }

    // ------------------------------------------------------------------
    // Dispatcher
    // ------------------------------------------------------------------

    /// Launches the long-lived dispatcher worker.
    pub fn start(self: &Arc<Self>) -> InstanceHandle {
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let instance = Arc::clone(self);
        let channel_id = self.channel_id();
        info!(
            channel = %channel_id,
            core_size = self.core_size,
            "starting instance dispatcher"
        );
        let handle = tokio::spawn(async move {
            instance.run_dispatcher(worker_token).await;
        });
        InstanceHandle {
            channel_id,
            handle,
            token,
        }
    }

    async fn run_dispatcher(self: Arc<Self>, token: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    break;
                }

                _ = self.work_signal.notified() => {
                    self.drain_queue(&token).await;
                }
            }
        }

        let queued = self.queue_len();
        let running = self.futures.len();
        if queued > 0 || running > 0 {
            info!(
                channel = %self.channel_id(),
                queued,
                running,
                "dispatcher stopped with work outstanding"
            );
        } else {
            debug!(channel = %self.channel_id(), "dispatcher stopped");
        }
    }

    async fn drain_queue(self: &Arc<Self>, token: &CancellationToken) {
        loop {
            if self.queue_guard().is_empty() {
                break;
            }

            // Reserve the execution slot before taking the entry out.
            let permit = loop {
                if token.is_cancelled() {
                    return;
                }
                match self.semaphore.try_acquire(self.config.admit_wait).await {
                    Some(permit) => break permit,
                    None => continue,
                }
            };

            let Some(entry) = self.queue_guard().pop_front() else {
                // Entry was removed while we waited for a slot.
                drop(permit);
                continue;
            };
            self.spawn_executor(entry, permit);
        }
    }

    fn spawn_executor(self: &Arc<Self>, entry: QueuedTask, permit: Permit) {
        let task_id = entry.task.id();
        let instance = Arc::clone(self);
        // The executor's final cleanup removes its own future-map entry, so
        // it must not run before the handle is registered; the gate holds it
        // until the insert below happened.
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = ready_rx.await;
            instance.execute(entry.task, entry.thunk, permit).await;
        });
        self.futures.insert(task_id, handle);
        let _ = ready_tx.send(());
    }

    // ------------------------------------------------------------------
    // Executor
    // ------------------------------------------------------------------

    async fn execute(self: Arc<Self>, task: TaskHandle, thunk: WorkThunk, permit: Permit) {
        // Slot held for the whole execution, released on drop.
        let _permit = permit;
        let task_id = task.id();
        self.running.insert(task_id.clone(), task.clone());
        debug!(channel = %self.channel_id(), task = %task_id, "task execution started");

        if let Err(e) = self.run_task(&task, thunk).await {
            if task.status().is_terminal() {
                warn!(
                    task = %task_id,
                    error = %e,
                    "execution error after task reached a terminal status"
                );
            } else {
                error!(task = %task_id, error = %e, "task execution failed");
                if task
                    .fail(format!("[Internal Server Error] {}", e))
                    .is_ok()
                {
                    if let Err(e) = self.save_and_notify(&task).await {
                        error!(task = %task_id, error = %e, "failed to persist task failure");
                    }
                }
            }
        }

        self.running.remove(&task_id);
        self.futures.remove(&task_id);
    }

    async fn run_task(&self, task: &TaskHandle, thunk: WorkThunk) -> Result<()> {
        let message = thunk().await?;
        if !message.is_success() {
            task.fail(message.description)?;
            self.save_and_notify(task).await?;
            return Ok(());
        }

        task.start()?;
        // Give the upstream time to register the job and attach the
        // correlating message id before the first report.
        tokio::time::sleep(self.config.first_delay).await;
        self.save_and_notify(task).await?;

        let deadline = self
            .config
            .poll_timeout
            .map(|limit| tokio::time::Instant::now() + limit);
        while task.status().is_active() {
            tokio::time::sleep(self.config.poll_interval).await;
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline && task.status().is_active() {
                    warn!(task = %task.id(), "task watchdog expired");
                    task.fail("timeout")?;
                }
            }
            // The loop only samples and reports; inbound upstream events
            // mutate the record.
            self.save_and_notify(task).await?;
        }

        debug!(
            task = %task.id(),
            status = %task.status(),
            "task reached terminal status"
        );
        Ok(())
    }

    /// Persists the current snapshot, then emits the change notification.
    /// A notification never precedes its persisted state; notifier failures
    /// are logged and swallowed.
    async fn save_and_notify(&self, task: &TaskHandle) -> Result<()> {
        let snapshot = task.snapshot();
        self.store.save(&snapshot).await?;
        if let Err(e) = self.notifier.notify_change(&snapshot).await {
            warn!(task = %snapshot.id, error = %e, "change notification failed");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Typed upstream pass-throughs
    // ------------------------------------------------------------------
    //
    // Thin forwards to the owned account's protocol client, so callers can
    // construct work thunks uniformly against the chosen instance. None of
    // these touch the queue.

    pub async fn imagine(&self, prompt: &str, nonce: &str) -> upstream::Result<Message> {
        self.client.imagine(prompt, nonce).await
    }

    pub async fn upscale(
        &self,
        message_id: &str,
        index: i32,
        message_hash: &str,
        flags: i32,
        nonce: &str,
    ) -> upstream::Result<Message> {
        self.client
            .upscale(message_id, index, message_hash, flags, nonce)
            .await
    }

    pub async fn variation(
        &self,
        message_id: &str,
        index: i32,
        message_hash: &str,
        flags: i32,
        nonce: &str,
    ) -> upstream::Result<Message> {
        self.client
            .variation(message_id, index, message_hash, flags, nonce)
            .await
    }

    pub async fn reroll(
        &self,
        message_id: &str,
        message_hash: &str,
        flags: i32,
        nonce: &str,
    ) -> upstream::Result<Message> {
        self.client
            .reroll(message_id, message_hash, flags, nonce)
            .await
    }

    pub async fn action(
        &self,
        message_id: &str,
        custom_id: &str,
        flags: i32,
        nonce: &str,
    ) -> upstream::Result<Message> {
        self.client.action(message_id, custom_id, flags, nonce).await
    }

    pub async fn describe(&self, file_name: &str, nonce: &str) -> upstream::Result<Message> {
        self.client.describe(file_name, nonce).await
    }

    pub async fn blend(
        &self,
        file_names: &[String],
        dimensions: BlendDimensions,
        nonce: &str,
    ) -> upstream::Result<Message> {
        self.client.blend(file_names, dimensions, nonce).await
    }

    pub async fn upload(&self, file_name: &str, data_url: &str) -> upstream::Result<Message> {
        self.client.upload(file_name, data_url).await
    }

    pub async fn send_image_message(
        &self,
        content: &str,
        file_name: &str,
    ) -> upstream::Result<Message> {
        self.client.send_image_message(content, file_name).await
    }
}

/// Handle for controlling a running instance dispatcher.
pub struct InstanceHandle {
    channel_id: String,
    handle: JoinHandle<()>,
    token: CancellationToken,
}

impl InstanceHandle {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Stops the dispatcher and waits for it to wind down. Tasks already
    /// admitted keep polling until they terminate (or their watchdog
    /// fires); queued entries stay queued.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Kills the dispatcher without winding down. Prefer
    /// [`shutdown`](Self::shutdown).
    pub fn abort(&self) {
        self.handle.abort();
    }
}
