//! Cached response entry

use std::time::Duration;
use tokio::time::Instant;

use crate::request::{RequestFingerprint, Response};

/// One cached response with the time it was stored
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: RequestFingerprint,
    pub payload: Response,
    pub created_at: Instant,
}

impl CacheEntry {
    pub fn new(fingerprint: RequestFingerprint, payload: Response) -> Self {
        Self {
            fingerprint,
            payload,
            created_at: Instant::now(),
        }
    }

    /// Expired once `ttl` has fully elapsed since creation
    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= ttl
    }
}
