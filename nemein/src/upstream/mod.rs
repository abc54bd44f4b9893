//! Consumed interface to the chat-platform bot that actually generates
//! images.
//!
//! The dispatch core never speaks the wire protocol itself: it calls
//! [`BotClient`] to ask the upstream to accept a job, and expects the
//! client's inbound event handling to mutate the corresponding
//! [`TaskHandle`](crate::core::TaskHandle) (progress, message id, terminal
//! status) while the executor's poll loop samples and reports it.

use crate::core::code;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Transport-level failures from the upstream client.
///
/// Protocol-level rejections are not errors: they come back as a
/// [`Message`] with a non-success code.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Request(String),

    #[error("upstream connection lost: {0}")]
    Connection(String),
}

pub type Result<T> = std::result::Result<T, UpstreamError>;

/// Reply from the upstream for a job submission attempt.
///
/// `code == code::SUCCESS` means the upstream accepted the job; any other
/// code is an immediate rejection described by `description`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub code: i32,
    pub description: String,
}

impl Message {
    pub fn success() -> Self {
        Self::of(code::SUCCESS, "success")
    }

    pub fn of(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == code::SUCCESS
    }
}

/// Aspect ratio selector for blend jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlendDimensions {
    Portrait,
    Square,
    Landscape,
}

/// Fresh correlator for an upstream request.
pub fn new_nonce() -> String {
    Uuid::new_v4().simple().to_string()
}

/// One authenticated connection to the upstream bot.
///
/// Implementations own login, framing and inbound event parsing; all of
/// that is out of scope here. Implementations must be thread-safe.
#[async_trait]
pub trait BotClient: Send + Sync {
    async fn imagine(&self, prompt: &str, nonce: &str) -> Result<Message>;

    async fn upscale(
        &self,
        message_id: &str,
        index: i32,
        message_hash: &str,
        flags: i32,
        nonce: &str,
    ) -> Result<Message>;

    async fn variation(
        &self,
        message_id: &str,
        index: i32,
        message_hash: &str,
        flags: i32,
        nonce: &str,
    ) -> Result<Message>;

    async fn reroll(
        &self,
        message_id: &str,
        message_hash: &str,
        flags: i32,
        nonce: &str,
    ) -> Result<Message>;

    async fn action(
        &self,
        message_id: &str,
        custom_id: &str,
        flags: i32,
        nonce: &str,
    ) -> Result<Message>;

    async fn describe(&self, file_name: &str, nonce: &str) -> Result<Message>;

    async fn blend(
        &self,
        file_names: &[String],
        dimensions: BlendDimensions,
        nonce: &str,
    ) -> Result<Message>;

    async fn upload(&self, file_name: &str, data_url: &str) -> Result<Message>;

    async fn send_image_message(&self, content: &str, file_name: &str) -> Result<Message>;
}
