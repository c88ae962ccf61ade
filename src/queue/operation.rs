//! Queued operation and derived queue snapshots

use chrono::{DateTime, Utc};
use http::Method;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::RequestError;
use crate::request::{CacheMode, RequestDescriptor, RequestId};
use crate::retry::RetryPolicy;

/// Processing priority. Declaration order is processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(name)
    }
}

/// A state-changing call waiting to be replayed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: RequestId,
    /// Caller-defined label, e.g. `mark_read` or `subscribe`
    pub operation_type: String,
    /// HTTP method the operation replays with
    pub method: String,
    /// Path (relative to the API base URL) or absolute URL
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: Priority,
    /// Failed executions so far; never decreases
    #[serde(default)]
    pub attempt_count: u32,
    /// Assigned by the queue; breaks ties between equal timestamps
    #[serde(default)]
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncOperation {
    pub fn new(operation_type: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            operation_type: operation_type.into(),
            method: method.as_str().to_string(),
            path: path.into(),
            payload: None,
            enqueued_at: Utc::now(),
            priority: Priority::default(),
            attempt_count: 0,
            sequence: 0,
            last_error: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enqueued_at(mut self, enqueued_at: DateTime<Utc>) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }

    /// Processing order: priority, then enqueue time, then sequence
    pub fn processing_order(&self, other: &SyncOperation) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.enqueued_at.cmp(&other.enqueued_at))
            .then(self.sequence.cmp(&other.sequence))
    }

    /// Request that replays this operation once.
    ///
    /// The queue owns the retry budget, so the request itself never retries;
    /// it also bypasses the response cache.
    pub fn to_descriptor(&self) -> Result<RequestDescriptor, RequestError> {
        let method = Method::from_bytes(self.method.as_bytes()).map_err(|_| {
            RequestError::ValidationFailure(format!("invalid method '{}'", self.method))
        })?;

        let descriptor = RequestDescriptor::new(method, self.path.clone())
            .with_id(self.id)
            .with_retry(RetryPolicy::single_attempt())
            .with_cache_mode(CacheMode::Bypass);

        match &self.payload {
            Some(payload) => descriptor.with_json(payload),
            None => Ok(descriptor),
        }
    }

    /// Fresh copy for a manual retry: new id, zero attempts
    pub(crate) fn requeued_copy(&self) -> Self {
        Self {
            id: RequestId::new(),
            enqueued_at: Utc::now(),
            attempt_count: 0,
            sequence: 0,
            last_error: None,
            ..self.clone()
        }
    }
}

/// Counts recomputed from the queue contents on every call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

/// What one drain did, summed over its passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Passes over the pending operations, including the last, partial one
    pub passes: u32,
    /// Executions, counting an operation once per pass it was tried in
    pub attempted: usize,
    pub succeeded: usize,
    /// Failed transiently and went back to pending
    pub requeued: usize,
    /// Moved to the failed bucket
    pub failed: usize,
    /// Another drain was already running, so this one did nothing
    pub skipped: bool,
    /// The drain stopped early (cancelled or connectivity lost)
    pub interrupted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn test_priority_orders_before_time() {
        let low_early = SyncOperation::new("mark_read", Method::POST, "/read")
            .with_priority(Priority::Low)
            .with_enqueued_at(at(0));
        let high_late = SyncOperation::new("subscribe", Method::POST, "/subscriptions")
            .with_priority(Priority::High)
            .with_enqueued_at(at(1));

        assert_eq!(high_late.processing_order(&low_early), Ordering::Less);
    }

    #[test]
    fn test_sequence_breaks_timestamp_ties() {
        let mut first = SyncOperation::new("a", Method::POST, "/a").with_enqueued_at(at(5));
        let mut second = SyncOperation::new("b", Method::POST, "/b").with_enqueued_at(at(5));
        first.sequence = 1;
        second.sequence = 2;
        assert_eq!(first.processing_order(&second), Ordering::Less);
    }

    #[test]
    fn test_descriptor_is_single_attempt_and_uncached() {
        let op = SyncOperation::new("mark_read", Method::PUT, "/articles/7/read")
            .with_payload(serde_json::json!({"read": true}));
        let descriptor = op.to_descriptor().unwrap();

        assert_eq!(descriptor.id(), op.id);
        assert_eq!(*descriptor.method(), Method::PUT);
        assert_eq!(descriptor.retry().unwrap().max_attempts, 1);
        assert_eq!(descriptor.cache_mode(), CacheMode::Bypass);
        assert_eq!(descriptor.body().unwrap().as_ref(), br#"{"read":true}"#);
    }

    #[test]
    fn test_invalid_method_is_validation_failure() {
        let mut op = SyncOperation::new("x", Method::POST, "/x");
        op.method = "NOT A METHOD".into();
        assert!(matches!(
            op.to_descriptor(),
            Err(RequestError::ValidationFailure(_))
        ));
    }

    #[test]
    fn test_requeued_copy_resets_bookkeeping() {
        let mut op = SyncOperation::new("x", Method::POST, "/x").with_priority(Priority::High);
        op.attempt_count = 4;
        op.last_error = Some("HTTP 503".into());

        let copy = op.requeued_copy();
        assert_ne!(copy.id, op.id);
        assert_eq!(copy.attempt_count, 0);
        assert_eq!(copy.last_error, None);
        assert_eq!(copy.priority, Priority::High);
        assert_eq!(copy.path, "/x");
    }

    #[test]
    fn test_priority_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
        let parsed: Priority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(parsed, Priority::Low);
    }
}
