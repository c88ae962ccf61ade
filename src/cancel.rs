//! Cooperative cancellation for in-flight requests.
//!
//! A `CancellationToken` can be cloned and shared; cancelling any clone is
//! observed by all of them, both by polling (`is_cancelled`) and by awaiting
//! (`cancelled`). The `CancellationRegistry` maps request ids to the token of
//! the call currently running under that id so callers can abort a single
//! request or every tracked request during teardown.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::request::RequestId;

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cancellation token for cooperative cancellation of async operations.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Calling this more than once has no further effect.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the token is cancelled.
    ///
    /// Returns immediately if the token is already cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register interest before re-checking the flag so a cancel between
        // the check and the await is not lost.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Whether two handles refer to the same token.
    pub fn same_token(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Tracks the cancellation token of every request currently executing.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<Mutex<HashMap<RequestId, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `token` under `id` until the returned guard is dropped.
    pub fn register(&self, id: RequestId, token: CancellationToken) -> Registration {
        self.tokens.lock().insert(id, token.clone());
        Registration {
            id,
            token,
            registry: self.clone(),
        }
    }

    /// Cancel the request tracked under `id`.
    ///
    /// Returns false when no such request is running (already finished or
    /// never started); that is not an error.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let token = self.tokens.lock().get(id).cloned();
        match token {
            Some(token) => {
                tracing::debug!(request_id = %id, "Cancelling request");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every tracked request, returning how many were signalled.
    ///
    /// Safe to call repeatedly; already-cancelled tokens are skipped.
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<CancellationToken> = self.tokens.lock().values().cloned().collect();
        let mut signalled = 0;
        for token in tokens {
            if !token.is_cancelled() {
                token.cancel();
                signalled += 1;
            }
        }
        if signalled > 0 {
            tracing::info!(count = signalled, "Cancelled all in-flight requests");
        }
        signalled
    }

    /// Number of requests currently tracked
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }

    fn deregister(&self, id: &RequestId, token: &CancellationToken) {
        let mut tokens = self.tokens.lock();
        // A reused id may have been re-registered by a newer call
        if tokens.get(id).is_some_and(|t| t.same_token(token)) {
            tokens.remove(id);
        }
    }
}

/// Removes its request from the registry when dropped.
#[derive(Debug)]
pub struct Registration {
    id: RequestId,
    token: CancellationToken,
    registry: CancellationRegistry,
}

impl Registration {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(&self.id, &self.token);
    }
}
