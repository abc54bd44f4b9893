//! Account configuration for one upstream bot connection.

use serde::{Deserialize, Serialize};

/// Hard upper bound on per-account concurrency. Configured `core_size`
/// values above this are clamped; the upstream throttles beyond it anyway.
pub const MAX_CORE_SIZE: u32 = 12;

fn default_enabled() -> bool {
    true
}

fn default_core_size() -> u32 {
    3
}

fn default_weight() -> u32 {
    1
}

/// Credential-bearing record identifying one upstream bot connection.
///
/// Read-mostly after initialization: the instance runtime takes ownership of
/// the account for its lifetime, and only `enabled` is expected to change at
/// runtime (admin toggling an account out of the selection pool).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Stable channel identifier; doubles as the instance id.
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: String,
    /// Opaque credential consumed by the upstream client.
    #[serde(default)]
    pub user_token: String,
    #[serde(default)]
    pub user_agent: String,
    /// Disabled accounts are not selection candidates.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Target concurrent executions; effective value is clamped to
    /// `[1, MAX_CORE_SIZE]`.
    #[serde(default = "default_core_size")]
    pub core_size: u32,
    /// Maximum pending queue depth; `0` means unbounded.
    #[serde(default)]
    pub queue_size: usize,
    /// Relative share used only by the weighted selection rule.
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub remark: String,
}

impl Account {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            guild_id: String::new(),
            user_token: String::new(),
            user_agent: String::new(),
            enabled: default_enabled(),
            core_size: default_core_size(),
            queue_size: 0,
            weight: default_weight(),
            remark: String::new(),
        }
    }

    pub fn with_core_size(mut self, core_size: u32) -> Self {
        self.core_size = core_size;
        self
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The semaphore count: `core_size` clamped to `[1, MAX_CORE_SIZE]`.
    pub fn effective_core_size(&self) -> u32 {
        self.core_size.clamp(1, MAX_CORE_SIZE)
    }
}
