//! Offline operation queue
//!
//! Holds state-changing operations that could not be sent, persists them to
//! the key-value store and replays them through the orchestrator when asked
//! (`force_sync`) or when connectivity comes back.
//!
//! Per operation: `pending -> in-flight -> succeeded | failed | pending`.
//!
//! Drain rules:
//! - at most one drain runs at a time; a concurrent `force_sync` is skipped
//! - operations run one at a time, never concurrently with themselves
//! - a drain runs in passes; each pass attempts every pending operation at
//!   most once, picking the next one afresh each time (priority, then
//!   enqueue time, then sequence)
//! - a transient failure requeues with `attempt_count + 1` while
//!   `attempt_count <= max_retries`; beyond that, or on a terminal failure,
//!   the operation moves to the failed bucket
//! - while operations remain pending after a pass, the drain waits out the
//!   backoff for that pass and starts another, so it only ends once pending
//!   is empty or connectivity is lost
//! - a cancelled execution goes back to pending unchanged and ends the drain
//!
//! Persistence is best-effort: a failed write is logged and reported as
//! `PersistOutcome::Failed`, and the in-memory queue carries on.

mod operation;
mod persistence;

pub use operation::{Priority, QueueStatus, SyncOperation, SyncReport};
pub use persistence::{PersistOutcome, PersistedQueue, RestoreOutcome};

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::RequestError;
use crate::orchestrator::RequestOrchestrator;
use crate::request::RequestId;
use crate::retry::RetryPolicy;
use crate::store::KeyValueStore;

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<SyncOperation>,
    in_flight: Option<SyncOperation>,
    succeeded: Vec<SyncOperation>,
    failed: Vec<SyncOperation>,
    next_sequence: u64,
}

impl QueueState {
    fn contains(&self, id: &RequestId) -> bool {
        self.pending.iter().any(|op| op.id == *id)
            || self.failed.iter().any(|op| op.id == *id)
            || self.in_flight.as_ref().is_some_and(|op| op.id == *id)
    }

    fn next_pending(&self, skip: &HashSet<RequestId>) -> Option<usize> {
        self.pending
            .iter()
            .enumerate()
            .filter(|(_, op)| !skip.contains(&op.id))
            .min_by(|(_, a), (_, b)| a.processing_order(b))
            .map(|(index, _)| index)
    }

    /// Document to persist; an operation mid-execution is stored as pending
    fn snapshot(&self) -> PersistedQueue {
        let mut pending = self.pending.clone();
        pending.extend(self.in_flight.iter().cloned());
        pending.sort_by(|a, b| a.processing_order(b));
        PersistedQueue::new(pending, self.failed.clone())
    }

    fn status(&self) -> QueueStatus {
        let in_flight = usize::from(self.in_flight.is_some());
        QueueStatus {
            pending: self.pending.len(),
            in_flight,
            succeeded: self.succeeded.len(),
            failed: self.failed.len(),
            total: self.pending.len() + in_flight + self.succeeded.len() + self.failed.len(),
        }
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    store: Arc<dyn KeyValueStore>,
    orchestrator: RequestOrchestrator,
    persistence_key: String,
    max_retries: u32,
    // Only the delays are used; budgets come from `max_retries`
    backoff: RetryPolicy,
    processing: AtomicBool,
    connectivity: Mutex<Option<ConnectivityMonitor>>,
    // Serializes snapshot + write so an older snapshot never lands last
    persist_lock: tokio::sync::Mutex<()>,
    restore_outcome: RestoreOutcome,
}

/// Cheaply cloneable handle; clones share the same queue
#[derive(Clone)]
pub struct OfflineQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("persistence_key", &self.inner.persistence_key)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl OfflineQueue {
    /// Load the persisted queue, starting empty when nothing usable is stored.
    ///
    /// Never fails: a missing, malformed or structurally invalid document, or
    /// an unreadable store, all yield an empty queue. What happened is
    /// available from [`restore_outcome`](Self::restore_outcome).
    pub async fn restore(
        config: &QueueConfig,
        store: Arc<dyn KeyValueStore>,
        orchestrator: RequestOrchestrator,
    ) -> Self {
        let key = config.persistence_key.clone();
        let mut state = QueueState::default();

        let restore_outcome = match store.get(&key).await {
            Ok(None) => RestoreOutcome::Empty,
            Ok(Some(raw)) => match PersistedQueue::decode(&raw) {
                Ok(persisted) => {
                    let outcome = RestoreOutcome::Restored {
                        pending: persisted.pending.len(),
                        failed: persisted.failed.len(),
                    };
                    state.next_sequence = persisted
                        .pending
                        .iter()
                        .chain(persisted.failed.iter())
                        .map(|op| op.sequence + 1)
                        .max()
                        .unwrap_or(0);
                    state.pending = persisted.pending;
                    state.failed = persisted.failed;
                    outcome
                }
                Err(reason) => {
                    tracing::warn!(
                        key = %key,
                        reason = %reason,
                        "Discarding unusable persisted queue, starting empty"
                    );
                    RestoreOutcome::Discarded { reason }
                }
            },
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "Failed to read persisted queue, starting empty"
                );
                RestoreOutcome::StoreUnavailable {
                    reason: e.to_string(),
                }
            }
        };

        if let RestoreOutcome::Restored { pending, failed } = &restore_outcome {
            tracing::info!(pending = pending, failed = failed, "Restored offline queue");
        }
        orchestrator.metrics().set_queue_pending(state.pending.len());

        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(state),
                store,
                orchestrator,
                persistence_key: key,
                max_retries: config.max_retries,
                backoff: config.backoff_policy(),
                processing: AtomicBool::new(false),
                connectivity: Mutex::new(None),
                persist_lock: tokio::sync::Mutex::new(()),
                restore_outcome,
            }),
        }
    }

    /// Append an operation and persist the queue.
    ///
    /// The operation is queued even when persisting fails.
    pub async fn add_to_queue(&self, mut operation: SyncOperation) -> PersistOutcome {
        {
            let mut state = self.inner.state.lock();
            if state.contains(&operation.id) {
                let duplicate = operation.id;
                operation.id = RequestId::new();
                tracing::warn!(
                    duplicate_id = %duplicate,
                    new_id = %operation.id,
                    "Queued operation id already in use, assigned a new id"
                );
            }
            operation.sequence = state.next_sequence;
            state.next_sequence += 1;

            tracing::debug!(
                operation_id = %operation.id,
                operation_type = %operation.operation_type,
                priority = %operation.priority,
                "Queued offline operation"
            );
            state.pending.push(operation);
            self.inner
                .orchestrator
                .metrics()
                .set_queue_pending(state.pending.len());
        }
        self.inner.persist().await
    }

    /// Drain pending operations until none are left to retry. See the module
    /// docs for the rules.
    pub async fn force_sync(&self) -> SyncReport {
        self.inner.drain().await
    }

    pub fn status(&self) -> QueueStatus {
        self.inner.state.lock().status()
    }

    /// Pending operations in processing order (including one mid-execution)
    pub fn pending(&self) -> Vec<SyncOperation> {
        self.inner.state.lock().snapshot().pending
    }

    pub fn failed(&self) -> Vec<SyncOperation> {
        self.inner.state.lock().failed.clone()
    }

    pub fn succeeded(&self) -> Vec<SyncOperation> {
        self.inner.state.lock().succeeded.clone()
    }

    /// Drop a pending operation; returns whether it was pending
    pub async fn remove(&self, id: &RequestId) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            let before = state.pending.len();
            state.pending.retain(|op| op.id != *id);
            let removed = state.pending.len() != before;
            self.inner
                .orchestrator
                .metrics()
                .set_queue_pending(state.pending.len());
            removed
        };
        if removed {
            self.inner.persist().await;
        }
        removed
    }

    /// Forget a failed operation for good
    pub async fn dismiss_failed(&self, id: &RequestId) -> bool {
        let dismissed = {
            let mut state = self.inner.state.lock();
            let before = state.failed.len();
            state.failed.retain(|op| op.id != *id);
            state.failed.len() != before
        };
        if dismissed {
            self.inner.persist().await;
        }
        dismissed
    }

    /// Queue a failed operation again as a fresh operation.
    ///
    /// Returns the new operation's id, or `None` if `id` is not in the failed
    /// bucket.
    pub async fn retry_failed(&self, id: &RequestId) -> Option<RequestId> {
        let copy = {
            let mut state = self.inner.state.lock();
            let index = state.failed.iter().position(|op| op.id == *id)?;
            let failed = state.failed.remove(index);
            failed.requeued_copy()
        };
        let new_id = copy.id;
        tracing::info!(failed_id = %id, new_id = %new_id, "Retrying failed operation");
        self.add_to_queue(copy).await;
        Some(new_id)
    }

    /// Forget succeeded operations, returning how many were dropped
    pub fn clear_completed(&self) -> usize {
        let mut state = self.inner.state.lock();
        let cleared = state.succeeded.len();
        state.succeeded.clear();
        cleared
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::SeqCst)
    }

    pub fn restore_outcome(&self) -> &RestoreOutcome {
        &self.inner.restore_outcome
    }

    /// Use `monitor` to stop draining when connectivity is lost
    pub fn attach_connectivity(&self, monitor: ConnectivityMonitor) {
        *self.inner.connectivity.lock() = Some(monitor);
    }

    /// Drain the queue every time `monitor` goes from offline to online.
    ///
    /// The task ends when every handle to the monitor is gone, or on the
    /// first reconnect after the queue has been dropped.
    pub fn spawn_reconnect_listener(&self, monitor: ConnectivityMonitor) -> JoinHandle<()> {
        self.attach_connectivity(monitor.clone());
        let queue: Weak<QueueInner> = Arc::downgrade(&self.inner);
        let mut receiver = monitor.subscribe();
        let mut was_online = *receiver.borrow_and_update();
        drop(monitor);

        tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let online = *receiver.borrow_and_update();
                if online && !was_online {
                    let Some(inner) = queue.upgrade() else {
                        break;
                    };
                    tracing::info!("Connectivity restored, draining offline queue");
                    let report = inner.drain().await;
                    tracing::info!(
                        passes = report.passes,
                        attempted = report.attempted,
                        succeeded = report.succeeded,
                        requeued = report.requeued,
                        failed = report.failed,
                        "Offline queue drain finished"
                    );
                }
                was_online = online;
            }
        })
    }
}

/// Clears the processing flag when a drain ends, however it ends
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Puts the in-flight operation back to pending if the drain is dropped
/// mid-execution
struct InFlightSlot<'a>(&'a Mutex<QueueState>);

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        if let Some(op) = state.in_flight.take() {
            state.pending.push(op);
        }
    }
}

enum Settled {
    Continue,
    Stop,
}

impl QueueInner {
    fn is_online(&self) -> bool {
        self.connectivity
            .lock()
            .as_ref()
            .map_or(true, ConnectivityMonitor::is_online)
    }

    async fn persist(&self) -> PersistOutcome {
        let _ordered = self.persist_lock.lock().await;

        let document = self.state.lock().snapshot();
        let written = match document.encode() {
            Ok(raw) => self.store.set(&self.persistence_key, &raw).await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => PersistOutcome::Persisted,
            Err(e) => {
                tracing::warn!(
                    key = %self.persistence_key,
                    error = %e,
                    "Failed to persist offline queue, continuing in memory"
                );
                PersistOutcome::Failed(e)
            }
        }
    }

    async fn drain(&self) -> SyncReport {
        if self.processing.swap(true, Ordering::SeqCst) {
            tracing::debug!("Offline queue drain already running, skipping");
            return SyncReport {
                skipped: true,
                ..Default::default()
            };
        }
        let _processing = ProcessingGuard(&self.processing);

        let mut report = SyncReport::default();
        loop {
            report.passes += 1;
            if let Settled::Stop = self.drain_pass(&mut report).await {
                report.interrupted = true;
                break;
            }

            let remaining = self.state.lock().pending.len();
            if remaining == 0 {
                break;
            }
            let delay = self.backoff.backoff_duration(report.passes);
            tracing::debug!(
                remaining = remaining,
                delay_ms = delay.as_millis() as u64,
                "Operations still pending, retrying after backoff"
            );
            if !self.wait_while_online(delay).await {
                tracing::info!("Connectivity lost, pausing offline queue drain");
                report.interrupted = true;
                break;
            }
        }

        self.orchestrator
            .metrics()
            .set_queue_pending(self.state.lock().pending.len());
        report
    }

    /// Attempt every pending operation at most once
    async fn drain_pass(&self, report: &mut SyncReport) -> Settled {
        let mut attempted: HashSet<RequestId> = HashSet::new();

        loop {
            if !self.is_online() {
                tracing::info!("Connectivity lost, pausing offline queue drain");
                return Settled::Stop;
            }

            let operation = {
                let mut state = self.state.lock();
                let Some(index) = state.next_pending(&attempted) else {
                    return Settled::Continue;
                };
                let operation = state.pending.remove(index);
                state.in_flight = Some(operation.clone());
                operation
            };
            attempted.insert(operation.id);
            report.attempted += 1;

            let slot = InFlightSlot(&self.state);
            let result = match operation.to_descriptor() {
                Ok(descriptor) => self.orchestrator.execute(descriptor).await.map(|_| ()),
                Err(e) => Err(e),
            };
            let settled = self.settle(result, report);
            drop(slot);

            self.persist().await;
            if let Settled::Stop = settled {
                return Settled::Stop;
            }
        }
    }

    /// Sleep for `delay`; false if connectivity is lost first
    async fn wait_while_online(&self, delay: Duration) -> bool {
        let receiver = self
            .connectivity
            .lock()
            .as_ref()
            .map(ConnectivityMonitor::subscribe);
        let Some(mut receiver) = receiver else {
            tokio::time::sleep(delay).await;
            return true;
        };

        let offline = async {
            if receiver.wait_for(|online| !*online).await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = offline => false,
        }
    }

    /// Move the in-flight operation to where `result` says it belongs
    fn settle(&self, result: Result<(), RequestError>, report: &mut SyncReport) -> Settled {
        let mut state = self.state.lock();
        let Some(mut operation) = state.in_flight.take() else {
            return Settled::Continue;
        };
        let metrics = self.orchestrator.metrics();

        match result {
            Ok(()) => {
                tracing::debug!(operation_id = %operation.id, "Offline operation succeeded");
                operation.last_error = None;
                state.succeeded.push(operation);
                report.succeeded += 1;
                metrics.record_queue_result("succeeded");
                Settled::Continue
            }
            Err(RequestError::Cancelled) => {
                tracing::debug!(operation_id = %operation.id, "Offline operation cancelled");
                state.pending.push(operation);
                Settled::Stop
            }
            Err(e) => {
                operation.attempt_count += 1;
                operation.last_error = Some(e.to_string());

                if e.is_transient() && operation.attempt_count <= self.max_retries {
                    tracing::debug!(
                        operation_id = %operation.id,
                        attempts = operation.attempt_count,
                        error = %e,
                        "Offline operation failed, requeued"
                    );
                    state.pending.push(operation);
                    report.requeued += 1;
                    metrics.record_queue_result("requeued");
                } else {
                    tracing::warn!(
                        operation_id = %operation.id,
                        operation_type = %operation.operation_type,
                        attempts = operation.attempt_count,
                        error = %e,
                        "Offline operation failed permanently"
                    );
                    state.failed.push(operation);
                    report.failed += 1;
                    metrics.record_queue_result("failed");
                }
                Settled::Continue
            }
        }
    }
}
