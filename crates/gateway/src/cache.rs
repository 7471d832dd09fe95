//! Read-through cache with per-key TTL.
//!
//! Sits in front of profile and usage-trend lookups to absorb repeat reads
//! within a freshness window. Two TTL classes are configured by the engine:
//! minutes for profile-shaped data, an hour for aggregated usage trends.
//!
//! The store is in-process, so the cache itself can never fail a request;
//! loader errors propagate to the caller and are never cached, which keeps
//! a degraded fetch from poisoning the freshness window. There is no
//! explicit invalidation path; staleness is bounded purely by TTL expiry.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Key/value cache where every entry carries its own expiry
pub struct ReadThroughCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
}

impl<K, V> ReadThroughCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Return the cached value for `key` if it is within its TTL, otherwise
    /// invoke `loader`, store the result with `ttl`, and return it.
    ///
    /// Two consecutive calls with the same key inside the TTL invoke the
    /// loader at most once.
    pub async fn get_or_load<F, Fut, E>(&self, key: K, ttl: Duration, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let now = Instant::now();
        let hit = self
            .entries
            .get(&key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone());

        if let Some(value) = hit {
            debug!(?key, "Cache hit");
            return Ok(value);
        }

        debug!(?key, "Cache miss, invoking loader");
        let value = loader().await?;
        self.entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(value)
    }

    /// Drop entries whose TTL has elapsed
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of entries currently stored, expired or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> Default for ReadThroughCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
