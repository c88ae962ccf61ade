//! Offline queue configuration.
//!
//! Default values are sourced from `crate::constants`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_MS,
    DEFAULT_QUEUE_MAX_RETRIES, DEFAULT_QUEUE_PERSISTENCE_KEY, DEFAULT_STORAGE_DIR,
};
use crate::retry::RetryPolicy;

fn default_persistence_key() -> String {
    DEFAULT_QUEUE_PERSISTENCE_KEY.to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_QUEUE_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_INITIAL_DELAY_MS
}

fn default_max_retry_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_DIR)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Store key the queue is persisted under
    #[serde(default = "default_persistence_key")]
    pub persistence_key: String,
    /// Retries allowed after the first failed attempt before an operation fails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Wait before re-attempting requeued operations within one drain;
    /// doubles after every pass
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Cap for the wait between passes
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Directory of the file-backed store
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            persistence_key: default_persistence_key(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            storage_dir: default_storage_dir(),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.persistence_key.trim().is_empty() {
            return Err("queue.persistence_key cannot be empty".to_string());
        }
        if self.retry_delay_ms > self.max_retry_delay_ms {
            return Err(format!(
                "queue.retry_delay_ms ({}) cannot exceed queue.max_retry_delay_ms ({})",
                self.retry_delay_ms, self.max_retry_delay_ms
            ));
        }
        Ok(())
    }

    /// Backoff between drain passes; attempt budgets live on the queue itself
    pub fn backoff_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_retries.saturating_add(1),
            Duration::from_millis(self.retry_delay_ms),
            Duration::from_millis(self.max_retry_delay_ms),
            DEFAULT_BACKOFF_FACTOR,
        )
    }
}
