//! The task record and its status state machine.
//!
//! A [`Task`] is the plain record that gets persisted and shipped to
//! notification consumers. A [`TaskHandle`] is the shared, mutable view of
//! one task: the executor that owns the task and the upstream event handler
//! both hold clones of the same handle, so every mutation goes through the
//! handle's methods and is validated against the transition table:
//!
//! ```text
//! NOT_START   -> SUBMITTED | FAILURE
//! SUBMITTED   -> IN_PROGRESS | SUCCESS | FAILURE | CANCEL
//! IN_PROGRESS -> SUCCESS | FAILURE | CANCEL
//! terminal    -> (none)
//! ```

use super::error::{Result, TaskError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Property-bag keys the dispatch core reads or writes.
///
/// The camelCase spellings are wire-visible: they are echoed back to API
/// callers and stored alongside the task, so they are kept verbatim.
pub mod property {
    /// Channel id of the account instance a task was routed to.
    pub const DISCORD_INSTANCE_ID: &str = "discordInstanceId";
    /// Number of entries ahead of a task at the moment it was queued.
    pub const NUMBER_OF_QUEUES: &str = "numberOfQueues";
    /// Upstream message id, once the upstream accepted the job.
    pub const MESSAGE_ID: &str = "messageId";
    /// Correlator echoed by upstream responses.
    pub const NONCE: &str = "nonce";
    /// Upstream message flags.
    pub const FLAGS: &str = "flags";
    /// Prompt as rewritten by the upstream.
    pub const FINAL_PROMPT: &str = "finalPrompt";
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Accepted by the dispatcher, not yet handed to the upstream.
    NotStart,
    /// The upstream accepted the job.
    Submitted,
    /// The upstream reported generation progress.
    InProgress,
    /// The job failed; `fail_reason` carries the cause.
    Failure,
    /// The job produced a result.
    Success,
    /// The job was cancelled.
    Cancel,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStart => "NOT_START",
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Failure => "FAILURE",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Cancel => "CANCEL",
        }
    }

    /// Returns true once no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Failure | TaskStatus::Success | TaskStatus::Cancel
        )
    }

    /// Returns true while the executor's poll loop keeps sampling the task.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Submitted | TaskStatus::InProgress)
    }

    /// Whether `next` is reachable from `self` in one step.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (NotStart, Submitted)
                | (NotStart, Failure)
                | (Submitted, InProgress)
                | (Submitted, Success)
                | (Submitted, Failure)
                | (Submitted, Cancel)
                | (InProgress, Success)
                | (InProgress, Failure)
                | (InProgress, Cancel)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "NOT_START" => Ok(TaskStatus::NotStart),
            "SUBMITTED" => Ok(TaskStatus::Submitted),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "FAILURE" => Ok(TaskStatus::Failure),
            "SUCCESS" => Ok(TaskStatus::Success),
            "CANCEL" => Ok(TaskStatus::Cancel),
            _ => Err(format!("unknown task status: {}", s)),
        }
    }
}

/// Kind of job a task asks the upstream to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskAction {
    Imagine,
    Upscale,
    Variation,
    Reroll,
    Action,
    Describe,
    Blend,
    Upload,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Imagine => "IMAGINE",
            TaskAction::Upscale => "UPSCALE",
            TaskAction::Variation => "VARIATION",
            TaskAction::Reroll => "REROLL",
            TaskAction::Action => "ACTION",
            TaskAction::Describe => "DESCRIBE",
            TaskAction::Blend => "BLEND",
            TaskAction::Upload => "UPLOAD",
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single user job: identity, status, progress, audit timestamps and a
/// free-form property bag. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub action: TaskAction,
    pub status: TaskStatus,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub description: String,
    /// Correlator echoed by upstream responses; may be empty before submit.
    #[serde(default)]
    pub nonce: String,
    /// Assigned by the upstream after it accepts the job.
    #[serde(default)]
    pub message_id: String,
    /// Progress string as reported by the upstream, e.g. `"37%"`.
    #[serde(default)]
    pub progress: String,
    pub submit_time: i64,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub finish_time: Option<i64>,
    #[serde(default)]
    pub fail_reason: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl Task {
    /// Creates a record in `NOT_START` with the submit timestamp set.
    pub fn new(id: impl Into<String>, action: TaskAction) -> Self {
        Self {
            id: id.into(),
            action,
            status: TaskStatus::NotStart,
            prompt: String::new(),
            description: String::new(),
            nonce: String::new(),
            message_id: String::new(),
            progress: String::new(),
            submit_time: now_millis(),
            start_time: None,
            finish_time: None,
            fail_reason: String::new(),
            image_url: String::new(),
            properties: HashMap::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = nonce.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Shared mutable view of one task.
///
/// Cloning the handle is cheap and every clone refers to the same record.
/// The lock is held only for the duration of a single method call and never
/// across an await point.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<RwLock<Task>>,
}

impl TaskHandle {
    pub fn new(task: Task) -> Self {
        Self {
            inner: Arc::new(RwLock::new(task)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Task> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Task> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> String {
        self.read().id.clone()
    }

    pub fn status(&self) -> TaskStatus {
        self.read().status
    }

    pub fn action(&self) -> TaskAction {
        self.read().action
    }

    pub fn nonce(&self) -> String {
        self.read().nonce.clone()
    }

    pub fn message_id(&self) -> String {
        self.read().message_id.clone()
    }

    pub fn progress(&self) -> String {
        self.read().progress.clone()
    }

    /// Owned copy of the record as it is right now. This is what gets
    /// persisted and handed to notification consumers.
    pub fn snapshot(&self) -> Task {
        self.read().clone()
    }

    /// Moves the task to `next`, stamping `start_time` on the transition to
    /// `SUBMITTED` and `finish_time` on any transition to a terminal status.
    /// Setting the current status again is a no-op.
    pub fn set_status(&self, next: TaskStatus) -> Result<()> {
        let mut task = self.write();
        transition(&mut task, next)
    }

    /// Marks the task submitted and resets progress to `"0%"`.
    pub fn start(&self) -> Result<()> {
        let mut task = self.write();
        transition(&mut task, TaskStatus::Submitted)?;
        task.progress = "0%".to_string();
        Ok(())
    }

    /// Terminal failure: records the reason and stamps `finish_time`.
    pub fn fail(&self, reason: impl Into<String>) -> Result<()> {
        let mut task = self.write();
        if task.status.is_terminal() {
            return Err(TaskError::AlreadyTerminal(task.status));
        }
        task.status = TaskStatus::Failure;
        task.fail_reason = reason.into();
        task.finish_time = Some(now_millis());
        Ok(())
    }

    pub fn set_progress(&self, progress: impl Into<String>) {
        self.write().progress = progress.into();
    }

    pub fn set_nonce(&self, nonce: impl Into<String>) {
        self.write().nonce = nonce.into();
    }

    pub fn set_message_id(&self, message_id: impl Into<String>) {
        self.write().message_id = message_id.into();
    }

    pub fn set_image_url(&self, image_url: impl Into<String>) {
        self.write().image_url = image_url.into();
    }

    pub fn set_property(&self, key: &str, value: impl Into<Value>) {
        self.write().properties.insert(key.to_string(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.read().properties.get(key).cloned()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let task = self.read();
        f.debug_struct("TaskHandle")
            .field("id", &task.id)
            .field("status", &task.status)
            .finish()
    }
}

fn transition(task: &mut Task, next: TaskStatus) -> Result<()> {
    if task.status == next {
        return Ok(());
    }
    if task.status.is_terminal() {
        return Err(TaskError::AlreadyTerminal(task.status));
    }
    if !task.status.can_transition_to(next) {
        return Err(TaskError::IllegalTransition {
            from: task.status,
            to: next,
        });
    }
    task.status = next;
    if next == TaskStatus::Submitted && task.start_time.is_none() {
        task.start_time = Some(now_millis());
    }
    if next.is_terminal() {
        task.finish_time = Some(now_millis());
    }
    Ok(())
}
