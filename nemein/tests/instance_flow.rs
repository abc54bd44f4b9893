//! End-to-end tests for the instance runtime: admission results, queue
//! positions, upstream rejection, cancellation of queued entries, FIFO
//! admission order, capacity limits and the poll-loop watchdog.
//!
//! The upstream is replaced by scripted thunks; "inbound upstream events"
//! are simulated by mutating the task handles directly, which is exactly
//! the coupling the runtime is built around.

use async_trait::async_trait;
use nemein::prelude::*;
use nemein::upstream::{self, BlendDimensions};
use nemein::{NotifyError, StoreError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ----------------------------------------------------------------------
// Fakes
// ----------------------------------------------------------------------

/// Bot client that answers every call with the same message.
struct StubClient {
    code: i32,
    description: String,
}

impl StubClient {
    fn accepting() -> Arc<Self> {
        Arc::new(Self {
            code: nemein::code::SUCCESS,
            description: "success".to_string(),
        })
    }

    fn reply(&self) -> upstream::Result<Message> {
        Ok(Message::of(self.code, self.description.clone()))
    }
}

#[async_trait]
impl BotClient for StubClient {
    async fn imagine(&self, _prompt: &str, _nonce: &str) -> upstream::Result<Message> {
        self.reply()
    }

    async fn upscale(
        &self,
        _message_id: &str,
        _index: i32,
        _message_hash: &str,
        _flags: i32,
        _nonce: &str,
    ) -> upstream::Result<Message> {
        self.reply()
    }

    async fn variation(
        &self,
        _message_id: &str,
        _index: i32,
        _message_hash: &str,
        _flags: i32,
        _nonce: &str,
    ) -> upstream::Result<Message> {
        self.reply()
    }

    async fn reroll(
        &self,
        _message_id: &str,
        _message_hash: &str,
        _flags: i32,
        _nonce: &str,
    ) -> upstream::Result<Message> {
        self.reply()
    }

    async fn action(
        &self,
        _message_id: &str,
        _custom_id: &str,
        _flags: i32,
        _nonce: &str,
    ) -> upstream::Result<Message> {
        self.reply()
    }

    async fn describe(&self, _file_name: &str, _nonce: &str) -> upstream::Result<Message> {
        self.reply()
    }

    async fn blend(
        &self,
        _file_names: &[String],
        _dimensions: BlendDimensions,
        _nonce: &str,
    ) -> upstream::Result<Message> {
        self.reply()
    }

    async fn upload(&self, _file_name: &str, _data_url: &str) -> upstream::Result<Message> {
        self.reply()
    }

    async fn send_image_message(
        &self,
        _content: &str,
        _file_name: &str,
    ) -> upstream::Result<Message> {
        self.reply()
    }
}

/// Notifier that records every snapshot it receives.
#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<Task>>,
}

impl RecordingNotifier {
    fn statuses(&self, task_id: &str) -> Vec<TaskStatus> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|task| task.id == task_id)
            .map(|task| task.status)
            .collect()
    }

    fn count(&self, task_id: &str) -> usize {
        self.statuses(task_id).len()
    }
}

#[async_trait]
impl ChangeNotifier for RecordingNotifier {
    async fn notify_change(&self, task: &Task) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(task.clone());
        Ok(())
    }
}

/// Store whose saves always fail, for the admission error path.
struct FailingStore;

#[async_trait]
impl TaskStore for FailingStore {
    async fn save(&self, _task: &Task) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".to_string()))
    }

    async fn delete(&self, _id: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, _id: &str) -> Result<Option<Task>, StoreError> {
        Ok(None)
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        Ok(Vec::new())
    }
}

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

fn fast_config() -> InstanceConfig {
    InstanceConfig {
        admit_wait: Duration::from_millis(20),
        first_delay: Duration::from_millis(10),
        poll_interval: Duration::from_millis(20),
        poll_timeout: None,
    }
}

struct Harness {
    instance: Arc<Instance>,
    handle: InstanceHandle,
    store: Arc<InMemoryTaskStore>,
    notifier: Arc<RecordingNotifier>,
}

fn start_instance(account: Account, config: InstanceConfig) -> Harness {
    let store = Arc::new(InMemoryTaskStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let instance = Instance::with_config(
        account,
        config,
        StubClient::accepting(),
        Arc::clone(&store) as Arc<dyn TaskStore>,
        Arc::clone(&notifier) as Arc<dyn ChangeNotifier>,
    );
    let handle = instance.start();
    Harness {
        instance,
        handle,
        store,
        notifier,
    }
}

fn task(id: &str) -> TaskHandle {
    TaskHandle::new(Task::new(id, TaskAction::Imagine))
}

fn ok_thunk() -> WorkThunk {
    Box::new(|| Box::pin(async { Ok(Message::success()) }))
}

fn reject_thunk(code: i32, description: &str) -> WorkThunk {
    let description = description.to_string();
    Box::new(move || Box::pin(async move { Ok(Message::of(code, description)) }))
}

async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ----------------------------------------------------------------------
// Scenarios
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_happy_submit_on_idle_instance() {
    let harness = start_instance(
        Account::new("acc-1").with_core_size(4),
        fast_config(),
    );
    let t1 = task("t1");

    let result = harness.instance.submit(t1.clone(), ok_thunk()).await;
    assert!(result.is_success());
    assert_eq!(result.description, "submitted");
    assert_eq!(result.task_id.as_deref(), Some("t1"));
    assert_eq!(
        result
            .property(property::DISCORD_INSTANCE_ID)
            .and_then(|v| v.as_str()),
        Some("acc-1")
    );

    wait_until("t1 to enter the running set", || {
        harness
            .instance
            .running_tasks()
            .iter()
            .any(|task| task.id == "t1")
    })
    .await;

    // upstream completes the job
    wait_until("t1 to be submitted", || {
        t1.status() == TaskStatus::Submitted
    })
    .await;
    t1.set_status(TaskStatus::Success).unwrap();

    wait_until("t1 to leave the running set", || {
        harness.instance.running_tasks().is_empty() && harness.instance.running_futures().is_empty()
    })
    .await;

    let statuses = harness.notifier.statuses("t1");
    let submitted = statuses
        .iter()
        .position(|s| *s == TaskStatus::Submitted)
        .expect("SUBMITTED notified");
    let success = statuses
        .iter()
        .position(|s| *s == TaskStatus::Success)
        .expect("SUCCESS notified");
    assert!(submitted < success);

    let stored = harness.store.get("t1").await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Success);

    harness.handle.shutdown().await;
}

#[tokio::test]
async fn test_queue_positions_behind_running_task() {
    let harness = start_instance(
        Account::new("acc-1").with_core_size(1),
        fast_config(),
    );

    let t0 = task("t0");
    let r0 = harness.instance.submit(t0.clone(), ok_thunk()).await;
    assert!(r0.is_success());
    wait_until("t0 to occupy the only slot", || {
        !harness.instance.running_futures().is_empty()
    })
    .await;

    let t1 = task("t1");
    let r1 = harness.instance.submit(t1.clone(), ok_thunk()).await;
    assert!(r1.is_in_queue());
    assert_eq!(
        r1.property(property::NUMBER_OF_QUEUES).and_then(|v| v.as_u64()),
        Some(0)
    );

    let t2 = task("t2");
    let r2 = harness.instance.submit(t2.clone(), ok_thunk()).await;
    assert!(r2.is_in_queue());
    assert_eq!(r2.description, "queued, 1 ahead");
    assert_eq!(
        r2.property(property::NUMBER_OF_QUEUES).and_then(|v| v.as_u64()),
        Some(1)
    );

    harness.handle.shutdown().await;
}

#[tokio::test]
async fn test_upstream_rejection_fails_task_and_frees_slot() {
    let harness = start_instance(
        Account::new("acc-1").with_core_size(1),
        fast_config(),
    );

    let t0 = task("t0");
    harness
        .instance
        .submit(t0.clone(), reject_thunk(code::FAILURE, "banned word"))
        .await;

    wait_until("t0 to fail", || t0.status() == TaskStatus::Failure).await;
    let snapshot = t0.snapshot();
    assert_eq!(snapshot.fail_reason, "banned word");
    assert!(snapshot.finish_time.is_some());

    wait_until("executor cleanup", || {
        harness.instance.running_tasks().is_empty() && harness.instance.running_futures().is_empty()
    })
    .await;
    assert_eq!(harness.notifier.count("t0"), 1);

    // the released slot admits the next task
    let t1 = task("t1");
    harness.instance.submit(t1.clone(), ok_thunk()).await;
    wait_until("t1 to start after the slot freed", || {
        t1.status() == TaskStatus::Submitted
    })
    .await;
    t1.set_status(TaskStatus::Success).unwrap();

    harness.handle.shutdown().await;
}

#[tokio::test]
async fn test_cancel_queued_task() {
    let harness = start_instance(
        Account::new("acc-1").with_core_size(1),
        fast_config(),
    );

    let t0 = task("t0");
    harness.instance.submit(t0.clone(), ok_thunk()).await;
    wait_until("t0 to start", || t0.status() == TaskStatus::Submitted).await;

    let t1 = task("t1");
    let r1 = harness.instance.submit(t1.clone(), ok_thunk()).await;
    assert!(r1.is_in_queue());

    // cancellation drives the record terminal, then removes the entry
    t1.fail("job cancelled").unwrap();
    harness.instance.exit_task(&t1).await;

    assert!(harness.instance.queue_tasks().is_empty());
    assert_eq!(harness.notifier.statuses("t1"), vec![TaskStatus::Failure]);
    assert_eq!(t0.status(), TaskStatus::Submitted);

    // the drain never observes the cancelled entry
    t0.set_status(TaskStatus::Success).unwrap();
    wait_until("t0 cleanup", || harness.instance.running_futures().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.notifier.count("t1"), 1);
    assert!(harness.instance.running_tasks().is_empty());

    harness.handle.shutdown().await;
}

#[tokio::test]
async fn test_admission_order_is_fifo() {
    let harness = start_instance(
        Account::new("acc-1").with_core_size(1),
        fast_config(),
    );
    let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    for id in ["a", "b", "c"] {
        let order = Arc::clone(&order);
        // terminal right after the thunk, so the next entry is admitted
        let thunk: WorkThunk = Box::new(move || {
            order.lock().unwrap().push(id.to_string());
            Box::pin(async { Ok(Message::of(code::FAILURE, "done")) })
        });
        harness.instance.submit(task(id), thunk).await;
    }

    wait_until("all three to execute", || order.lock().unwrap().len() == 3).await;
    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);

    harness.handle.shutdown().await;
}

#[tokio::test]
async fn test_running_set_bounded_by_core_size() {
    let harness = start_instance(
        Account::new("acc-1").with_core_size(2),
        fast_config(),
    );

    let tasks: Vec<TaskHandle> = (0..5).map(|i| task(&format!("t{}", i))).collect();
    for handle in &tasks {
        harness.instance.submit(handle.clone(), ok_thunk()).await;
    }

    wait_until("two tasks running", || {
        harness.instance.running_futures().len() == 2
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.instance.running_tasks().len(), 2);
    assert_eq!(harness.instance.queue_len(), 3);

    // completing tasks lets the queue drain without ever exceeding the cap
    wait_until("all tasks to terminate", || {
        assert!(harness.instance.running_futures().len() <= 2);
        for handle in &tasks {
            if handle.status() == TaskStatus::Submitted {
                handle.set_status(TaskStatus::Success).unwrap();
            }
        }
        tasks.iter().all(|handle| handle.status().is_terminal())
    })
    .await;

    wait_until("queue drained", || {
        harness.instance.queue_len() == 0 && harness.instance.running_futures().is_empty()
    })
    .await;

    harness.handle.shutdown().await;
}

#[tokio::test]
async fn test_watchdog_times_out_stuck_task() {
    let mut config = fast_config();
    config.poll_timeout = Some(Duration::from_millis(100));
    let harness = start_instance(Account::new("acc-1").with_core_size(1), config);

    let t0 = task("t0");
    harness.instance.submit(t0.clone(), ok_thunk()).await;

    // no upstream event ever arrives
    wait_until("watchdog to fire", || t0.status() == TaskStatus::Failure).await;
    assert_eq!(t0.snapshot().fail_reason, "timeout");
    wait_until("slot released", || harness.instance.running_futures().is_empty()).await;

    harness.handle.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_rejects_submission() {
    let harness = start_instance(
        Account::new("acc-1").with_core_size(1).with_queue_size(1),
        fast_config(),
    );

    let t0 = task("t0");
    harness.instance.submit(t0.clone(), ok_thunk()).await;
    wait_until("t0 to start", || t0.status() == TaskStatus::Submitted).await;

    let t1 = task("t1");
    assert!(harness.instance.submit(t1, ok_thunk()).await.is_in_queue());

    let t2 = task("t2");
    let rejected = harness.instance.submit(t2, ok_thunk()).await;
    assert_eq!(rejected.code, code::QUEUE_REJECTED);
    assert_eq!(rejected.description, "queue is full");
    // admission stays atomic: the rejected record was rolled back
    assert!(harness.store.get("t2").await.unwrap().is_none());
    assert!(harness.store.get("t1").await.unwrap().is_some());

    harness.handle.shutdown().await;
}

#[tokio::test]
async fn test_lookup_running_by_nonce_and_message_id() {
    let harness = start_instance(
        Account::new("acc-1").with_core_size(2),
        fast_config(),
    );

    let t0 = TaskHandle::new(Task::new("t0", TaskAction::Imagine).with_nonce("n-1"));
    harness.instance.submit(t0.clone(), ok_thunk()).await;
    wait_until("t0 to start", || t0.status() == TaskStatus::Submitted).await;

    // upstream event attaches the message id
    t0.set_message_id("m-1");

    let by_nonce = harness.instance.get_running_by_nonce("n-1").unwrap();
    assert_eq!(by_nonce.id(), "t0");
    let by_message = harness.instance.get_running_by_message_id("m-1").unwrap();
    assert_eq!(by_message.id(), "t0");
    assert!(harness.instance.get_running_by_nonce("other").is_none());
    assert!(harness
        .instance
        .find_running(|task| task.id == "nope")
        .is_none());

    t0.set_status(TaskStatus::Success).unwrap();
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn test_store_failure_fails_admission() {
    let notifier = Arc::new(RecordingNotifier::default());
    let instance = Instance::with_config(
        Account::new("acc-1"),
        fast_config(),
        StubClient::accepting(),
        Arc::new(FailingStore),
        Arc::clone(&notifier) as Arc<dyn ChangeNotifier>,
    );
    let handle = instance.start();

    let result = instance.submit(task("t0"), ok_thunk()).await;
    assert!(result.is_failure());
    assert_eq!(instance.queue_len(), 0);
    assert_eq!(notifier.count("t0"), 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_admission_loop() {
    let harness = start_instance(Account::new("acc-1"), fast_config());
    assert!(harness.handle.is_running());
    harness.handle.shutdown().await;
}
