//! Submission results returned to API callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Numeric return codes shared with the upstream protocol.
///
/// `Message.code` from the upstream client and `SubmitResult.code` use the
/// same vocabulary, so an upstream rejection code can be surfaced unchanged.
pub mod code {
    pub const SUCCESS: i32 = 1;
    pub const NOT_FOUND: i32 = 3;
    pub const VALIDATION_ERROR: i32 = 4;
    pub const FAILURE: i32 = 9;
    pub const IN_QUEUE: i32 = 21;
    pub const EXISTED: i32 = 22;
    pub const QUEUE_REJECTED: i32 = 23;
}

/// Outcome of submitting a task to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    pub code: i32,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl SubmitResult {
    /// Accepted with a free execution slot: the task id is echoed back.
    pub fn submitted(task_id: impl Into<String>) -> Self {
        Self {
            code: code::SUCCESS,
            description: "submitted".to_string(),
            task_id: Some(task_id.into()),
            properties: HashMap::new(),
        }
    }

    /// Accepted but queued behind `ahead` earlier entries.
    pub fn in_queue(ahead: usize) -> Self {
        Self {
            code: code::IN_QUEUE,
            description: format!("queued, {} ahead", ahead),
            task_id: None,
            properties: HashMap::new(),
        }
        .with_property(crate::core::task::property::NUMBER_OF_QUEUES, ahead)
    }

    pub fn failure(description: impl Into<String>) -> Self {
        Self::failure_with(code::FAILURE, description)
    }

    pub fn failure_with(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            task_id: None,
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn is_success(&self) -> bool {
        self.code == code::SUCCESS
    }

    pub fn is_in_queue(&self) -> bool {
        self.code == code::IN_QUEUE
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success() && !self.is_in_queue()
    }
}
