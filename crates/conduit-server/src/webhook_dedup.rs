//! Alert fingerprint deduplication for the webhook intake.
//!
//! Grounded in `original_source/app/api/v1/routes/webhooks.py`'s
//! `_dedup_cache`: a size-capped, TTL-pruned map from fingerprint to
//! first-seen time, so the same firing alert doesn't spawn a run on every
//! retry within the TTL window.

use std::time::{Duration, Instant};

use dashmap::DashMap;

const PRUNE_THRESHOLD: usize = 1000;

pub struct WebhookDedupCache {
    seen: DashMap<String, Instant>,
    ttl: Duration,
}

impl WebhookDedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    /// Returns `true` if `fingerprint` was already recorded within the TTL
    /// window (i.e. this is a duplicate alert).
    pub fn is_duplicate(&self, fingerprint: &str) -> bool {
        match self.seen.get(fingerprint) {
            Some(seen_at) => seen_at.elapsed() < self.ttl,
            None => false,
        }
    }

    /// Records `fingerprint` as seen now. Called before the run is created
    /// so a burst of identical retries can't race past the dedup check.
    pub fn record(&self, fingerprint: &str) {
        self.seen.insert(fingerprint.to_string(), Instant::now());
        if self.seen.len() > PRUNE_THRESHOLD {
            self.prune();
        }
    }

    fn prune(&self) {
        let ttl = self.ttl;
        self.seen.retain(|_, seen_at| seen_at.elapsed() < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_not_a_duplicate() {
        let cache = WebhookDedupCache::new(Duration::from_secs(60));
        assert!(!cache.is_duplicate("fp1"));
        cache.record("fp1");
        assert!(cache.is_duplicate("fp1"));
    }

    #[test]
    fn expired_entry_is_no_longer_a_duplicate() {
        let cache = WebhookDedupCache::new(Duration::from_millis(1));
        cache.record("fp1");
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cache.is_duplicate("fp1"));
    }
}
