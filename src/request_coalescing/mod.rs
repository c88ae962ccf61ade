// Request Coalescing Module
//
// Deduplicates concurrent identical requests (same fingerprint).
// When several callers issue the same request while it is still running:
// - First caller (leader): gets the `LeaderWork`, runs the call on its own task
//   and publishes the outcome
// - Every caller, the leader included, holds a `Subscription` and waits for
//   that one outcome
// - A subscriber that cancels stops waiting on its own; the shared call is
//   only cancelled when its last subscriber is gone
//
// The in-flight entry is removed when the leader work completes or is dropped,
// so a failed or cancelled call never leaves a stale entry behind.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::cancel::CancellationToken;
use crate::error::RequestError;
use crate::request::{RequestFingerprint, Response};

/// Outcome shared by every subscriber of one in-flight request
pub type SharedOutcome = Result<Response, RequestError>;

#[derive(Debug)]
struct InFlightEntry {
    flight_id: u64,
    outcome: watch::Receiver<Option<SharedOutcome>>,
    token: CancellationToken,
    subscribers: usize,
    started_at: Instant,
}

/// Request coalescing manager
/// Tracks in-flight requests by fingerprint and attaches duplicates to them
#[derive(Debug, Clone, Default)]
pub struct RequestCoalescer {
    in_flight: Arc<Mutex<HashMap<RequestFingerprint, InFlightEntry>>>,
    next_flight: Arc<AtomicU64>,
}

impl RequestCoalescer {
    /// Create a new request coalescer
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight request for `fingerprint`, or start one.
    ///
    /// `work` is `Some` only for the caller that started the request; that
    /// caller must run it (usually on a spawned task) and call
    /// [`LeaderWork::complete`].
    pub fn acquire(&self, fingerprint: &RequestFingerprint) -> Acquired {
        let mut in_flight = self.in_flight.lock();

        if let Some(entry) = in_flight.get_mut(fingerprint) {
            entry.subscribers += 1;
            tracing::debug!(
                fingerprint = %fingerprint,
                subscribers = entry.subscribers,
                "Joining in-flight request"
            );
            return Acquired {
                subscription: Subscription {
                    fingerprint: fingerprint.clone(),
                    flight_id: entry.flight_id,
                    outcome: entry.outcome.clone(),
                    coalescer: self.clone(),
                },
                work: None,
            };
        }

        let flight_id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        let token = CancellationToken::new();

        in_flight.insert(
            fingerprint.clone(),
            InFlightEntry {
                flight_id,
                outcome: receiver.clone(),
                token: token.clone(),
                subscribers: 1,
                started_at: Instant::now(),
            },
        );

        Acquired {
            subscription: Subscription {
                fingerprint: fingerprint.clone(),
                flight_id,
                outcome: receiver,
                coalescer: self.clone(),
            },
            work: Some(LeaderWork {
                fingerprint: fingerprint.clone(),
                flight_id,
                sender,
                token,
                coalescer: self.clone(),
            }),
        }
    }

    /// Get current number of in-flight requests
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Number of callers waiting on the request for `fingerprint`
    pub fn subscribers(&self, fingerprint: &RequestFingerprint) -> usize {
        self.in_flight
            .lock()
            .get(fingerprint)
            .map_or(0, |entry| entry.subscribers)
    }

    /// How long the request for `fingerprint` has been running
    pub fn elapsed(&self, fingerprint: &RequestFingerprint) -> Option<std::time::Duration> {
        self.in_flight
            .lock()
            .get(fingerprint)
            .map(|entry| entry.started_at.elapsed())
    }

    /// Cancel every shared underlying call
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<CancellationToken> = self
            .in_flight
            .lock()
            .values()
            .map(|entry| entry.token.clone())
            .collect();
        let mut signalled = 0;
        for token in tokens {
            if !token.is_cancelled() {
                token.cancel();
                signalled += 1;
            }
        }
        signalled
    }

    fn leave(&self, fingerprint: &RequestFingerprint, flight_id: u64, settled: bool) {
        let mut in_flight = self.in_flight.lock();
        let Some(entry) = in_flight.get_mut(fingerprint) else {
            return;
        };
        if entry.flight_id != flight_id {
            return;
        }

        entry.subscribers = entry.subscribers.saturating_sub(1);
        if entry.subscribers == 0 && !settled {
            // Nobody is waiting any more: abandon the call and let the next
            // identical request start fresh
            tracing::debug!(fingerprint = %fingerprint, "Last subscriber left, cancelling request");
            entry.token.cancel();
            in_flight.remove(fingerprint);
        }
    }

    fn remove_in_flight(&self, fingerprint: &RequestFingerprint, flight_id: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(fingerprint)
            .is_some_and(|entry| entry.flight_id == flight_id)
        {
            in_flight.remove(fingerprint);
        }
    }
}

/// Result of [`RequestCoalescer::acquire`]
#[derive(Debug)]
pub struct Acquired {
    pub subscription: Subscription,
    /// Present only for the caller that started the request
    pub work: Option<LeaderWork>,
}

impl Acquired {
    /// Check if this caller started the request
    pub fn is_leader(&self) -> bool {
        self.work.is_some()
    }
}

/// One caller's wait on a shared outcome
#[derive(Debug)]
pub struct Subscription {
    fingerprint: RequestFingerprint,
    flight_id: u64,
    outcome: watch::Receiver<Option<SharedOutcome>>,
    coalescer: RequestCoalescer,
}

impl Subscription {
    /// Wait for the shared outcome, or until `token` is cancelled.
    ///
    /// Cancelling `token` only ends this caller's wait.
    pub async fn wait(mut self, token: &CancellationToken) -> SharedOutcome {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(RequestError::Cancelled),
            settled = self.outcome.wait_for(Option::is_some) => match settled {
                Ok(outcome) => outcome.clone().unwrap_or(Err(RequestError::Cancelled)),
                // The leader went away without publishing anything
                Err(_) => Err(RequestError::Cancelled),
            },
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let settled = self.outcome.borrow().is_some();
        self.coalescer
            .leave(&self.fingerprint, self.flight_id, settled);
    }
}

/// The actual call, owned by whoever started it
#[derive(Debug)]
pub struct LeaderWork {
    fingerprint: RequestFingerprint,
    flight_id: u64,
    sender: watch::Sender<Option<SharedOutcome>>,
    token: CancellationToken,
    coalescer: RequestCoalescer,
}

impl LeaderWork {
    /// Token of the shared call; cancelled when every subscriber has left or
    /// on [`RequestCoalescer::cancel_all`]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Publish the outcome to every subscriber and retire the entry
    pub fn complete(self, outcome: SharedOutcome) {
        self.sender.send_replace(Some(outcome));
    }
}

impl Drop for LeaderWork {
    fn drop(&mut self) {
        self.coalescer
            .remove_in_flight(&self.fingerprint, self.flight_id);
    }
}
