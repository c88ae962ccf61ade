//! Request deduplication configuration.
//!
//! Default: enabled. When disabled every call goes to the network on its own.

use serde::{Deserialize, Serialize};

/// Default enabled state
fn default_enabled() -> bool {
    true
}

/// Request coalescing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoalescingConfig {
    /// Share one in-flight call between identical concurrent requests (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for CoalescingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}
