//! Persisted queue document
//!
//! The whole queue is stored as one JSON document under the configured key:
//!
//! ```json
//! {"version": 1, "pending": [...], "failed": [...]}
//! ```
//!
//! A document that does not parse or fails `validate` is discarded on
//! restore; the queue then starts empty.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::operation::SyncOperation;
use crate::constants::QUEUE_FORMAT_VERSION;
use crate::store::StorageError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedQueue {
    pub version: u32,
    pub pending: Vec<SyncOperation>,
    #[serde(default)]
    pub failed: Vec<SyncOperation>,
}

impl PersistedQueue {
    pub fn new(pending: Vec<SyncOperation>, failed: Vec<SyncOperation>) -> Self {
        Self {
            version: QUEUE_FORMAT_VERSION,
            pending,
            failed,
        }
    }

    /// Structural checks: known version, non-nil unique ids, a method and path
    pub fn validate(&self) -> Result<(), String> {
        if self.version != QUEUE_FORMAT_VERSION {
            return Err(format!(
                "unsupported queue format version {} (expected {})",
                self.version, QUEUE_FORMAT_VERSION
            ));
        }

        let mut seen = HashSet::new();
        for op in self.pending.iter().chain(self.failed.iter()) {
            if op.id.is_nil() {
                return Err("operation with nil id".to_string());
            }
            if !seen.insert(op.id) {
                return Err(format!("duplicate operation id {}", op.id));
            }
            if op.method.trim().is_empty() || op.path.trim().is_empty() {
                return Err(format!("operation {} has no method or path", op.id));
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<String, StorageError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate a stored document
    pub fn decode(raw: &str) -> Result<Self, String> {
        let queue: PersistedQueue =
            serde_json::from_str(raw).map_err(|e| format!("malformed queue document: {}", e))?;
        queue.validate()?;
        Ok(queue)
    }
}

/// Result of a best-effort write of the queue
#[derive(Debug)]
pub enum PersistOutcome {
    Persisted,
    /// The in-memory queue is unaffected; only durability was lost
    Failed(StorageError),
}

impl PersistOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, PersistOutcome::Persisted)
    }
}

/// What happened when the queue was loaded at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Nothing was stored
    Empty,
    Restored { pending: usize, failed: usize },
    /// A stored document existed but was unusable and was ignored
    Discarded { reason: String },
    /// The store could not be read
    StoreUnavailable { reason: String },
}
