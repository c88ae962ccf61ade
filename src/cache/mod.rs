//! Response cache with a time-to-live
//!
//! Maps a `RequestFingerprint` to the last successful response. Expiry is
//! lazy: a read of an expired entry reports a miss and removes the entry.
//! `purge_expired` sweeps everything at once. The cache holds at most
//! `max_entries` entries; inserting into a full cache first drops expired
//! entries and then the oldest one.
//!
//! The TTL can be changed after construction and applies to every read from
//! then on, including reads of entries stored earlier.

mod entry;
mod stats;

pub use entry::CacheEntry;
pub use stats::CacheStats;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::request::{RequestFingerprint, Response};
use stats::CacheStatsTracker;

#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<RequestFingerprint, CacheEntry>>,
    ttl: RwLock<Duration>,
    max_entries: usize,
    stats: CacheStatsTracker,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: RwLock::new(ttl),
            max_entries: max_entries.max(1),
            stats: CacheStatsTracker::new(),
        }
    }

    /// Cached response for `fingerprint`, if present and not expired
    pub fn get(&self, fingerprint: &RequestFingerprint) -> Option<Response> {
        let ttl = self.ttl();
        let mut entries = self.entries.lock();

        let expired = match entries.get(fingerprint) {
            None => {
                self.stats.increment_misses();
                return None;
            }
            Some(entry) => entry.is_expired(ttl, Instant::now()),
        };

        if expired {
            entries.remove(fingerprint);
            self.stats.increment_misses();
            self.stats.add_evictions(1);
            tracing::trace!(fingerprint = %fingerprint, "Cache entry expired");
            return None;
        }

        self.stats.increment_hits();
        entries.get(fingerprint).map(|entry| entry.payload.clone())
    }

    /// Store `payload`, replacing any previous entry and restarting its TTL
    pub fn set(&self, fingerprint: RequestFingerprint, payload: Response) {
        let ttl = self.ttl();
        let mut entries = self.entries.lock();

        if !entries.contains_key(&fingerprint) && entries.len() >= self.max_entries {
            let now = Instant::now();
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(ttl, now));
            let mut evicted = (before - entries.len()) as u64;

            if entries.len() >= self.max_entries {
                let oldest = entries
                    .values()
                    .min_by_key(|entry| entry.created_at)
                    .map(|entry| entry.fingerprint.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                    evicted += 1;
                }
            }
            self.stats.add_evictions(evicted);
        }

        entries.insert(fingerprint.clone(), CacheEntry::new(fingerprint, payload));
    }

    /// Remove one entry; returns whether it was present
    pub fn delete(&self, fingerprint: &RequestFingerprint) -> bool {
        self.entries.lock().remove(fingerprint).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn ttl(&self) -> Duration {
        *self.ttl.read()
    }

    /// Change the TTL used by subsequent reads
    pub fn set_ttl(&self, ttl: Duration) {
        *self.ttl.write() = ttl;
    }

    /// Remove every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let ttl = self.ttl();
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(ttl, now));
        let purged = before - entries.len();
        self.stats.add_evictions(purged as u64);
        purged
    }

    /// Number of stored entries, expired or not
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
            .snapshot(self.len() as u64, self.max_entries as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn fp(url: &str) -> RequestFingerprint {
        RequestFingerprint::compute(&Method::GET, url, None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_served_until_ttl_then_absent() {
        let cache = ResponseCache::new(Duration::from_secs(300), 100);
        let key = fp("http://api/feeds");
        cache.set(key.clone(), Response::new(200, "[1]"));

        tokio::time::advance(Duration::from_millis(299_999)).await;
        assert_eq!(cache.get(&key).unwrap().body, "[1]");

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 0, "expired read evicts the entry");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_ttl_applies_to_existing_entries() {
        let cache = ResponseCache::new(Duration::from_secs(300), 100);
        let key = fp("http://api/feeds");
        cache.set(key.clone(), Response::new(200, "[]"));

        tokio::time::advance(Duration::from_secs(20)).await;
        cache.set_ttl(Duration::from_secs(10));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.ttl(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_restarts_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(10), 100);
        let key = fp("http://api/feeds");
        cache.set(key.clone(), Response::new(200, "old"));

        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set(key.clone(), Response::new(200, "new"));

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get(&key).unwrap().body, "new");
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = ResponseCache::new(Duration::from_secs(60), 100);
        cache.set(fp("http://api/a"), Response::new(200, "a"));
        cache.set(fp("http://api/b"), Response::new(200, "b"));

        assert!(cache.delete(&fp("http://api/a")));
        assert!(!cache.delete(&fp("http://api/a")));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest_entry() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.set(fp("http://api/a"), Response::new(200, "a"));
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set(fp("http://api/b"), Response::new(200, "b"));
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set(fp("http://api/c"), Response::new(200, "c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&fp("http://api/a")).is_none());
        assert!(cache.get(&fp("http://api/b")).is_some());
        assert!(cache.get(&fp("http://api/c")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = ResponseCache::new(Duration::from_secs(10), 100);
        cache.set(fp("http://api/a"), Response::new(200, "a"));
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.set(fp("http://api/b"), Response::new(200, "b"));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10);
        let key = fp("http://api/feeds");
        assert!(cache.get(&key).is_none());
        cache.set(key.clone(), Response::new(200, "[]"));
        assert!(cache.get(&key).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.current_item_count, 1);
        assert_eq!(stats.max_item_count, 10);
    }
}
