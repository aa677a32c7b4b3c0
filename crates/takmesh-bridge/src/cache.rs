//! Duplicate suppression for inbound mesh packets
//!
//! Meshtastic floods: the same packet can reach the bridge's radio more than
//! once over different paths, and the device may replay its queue after a
//! reconnect. Every packet is identified by `(sender, packet id)`; a key seen
//! again inside the TTL is dropped, which keeps delivery at-most-once into
//! the TAK network.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::config::BridgeConfig;
use crate::identity::NodeId;

/// Key for deduplication cache entries
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct DeduplicationKey {
    /// Sending node
    pub sender: NodeId,
    /// Packet id assigned by the sender
    pub packet_id: u32,
}

impl DeduplicationKey {
    /// Create a key
    pub fn new(sender: NodeId, packet_id: u32) -> Self {
        Self { sender, packet_id }
    }
}

impl std::fmt::Display for DeduplicationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:08x}", self.sender, self.packet_id)
    }
}

/// LRU-bounded set of recently seen packets with TTL expiration
///
/// Owned by the bridge loop; the count of blocked duplicates lives in
/// `BridgeStats`.
#[derive(Debug)]
pub struct DeduplicationCache {
    /// Key to the instant it was first seen
    cache: LruCache<DeduplicationKey, Instant>,
    ttl: Duration,
}

impl DeduplicationCache {
    /// Create a new deduplication cache with default settings
    pub fn new() -> Self {
        Self::with_capacity_and_ttl(1000, Duration::from_secs(300))
    }

    /// Create from bridge configuration
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::with_capacity_and_ttl(config.dedup_cache_size, config.dedup_ttl)
    }

    /// Create with custom capacity and TTL
    pub fn with_capacity_and_ttl(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(cap),
            ttl,
        }
    }

    /// Check if a packet is a duplicate
    ///
    /// Returns `true` if the key was seen within the TTL. A new key is
    /// recorded and `false` returned.
    pub fn is_duplicate(&mut self, key: &DeduplicationKey) -> bool {
        self.is_duplicate_at(key, Instant::now())
    }

    fn is_duplicate_at(&mut self, key: &DeduplicationKey, now: Instant) -> bool {
        if let Some(first_seen) = self.cache.get_mut(key) {
            if now.saturating_duration_since(*first_seen) > self.ttl {
                trace!(key = %key, "Cache entry expired, treating as new");
                *first_seen = now;
                return false;
            }
            debug!(key = %key, "Duplicate packet detected");
            return true;
        }

        self.cache.put(*key, now);
        trace!(key = %key, "New packet recorded");
        false
    }

    /// Remove entries older than the TTL, returning how many were removed
    pub fn expire_old_entries(&mut self) -> usize {
        self.expire_older_than(Instant::now())
    }

    fn expire_older_than(&mut self, now: Instant) -> usize {
        let expired: Vec<DeduplicationKey> = self
            .cache
            .iter()
            .filter(|(_, first_seen)| now.saturating_duration_since(**first_seen) > self.ttl)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            self.cache.pop(key);
        }
        expired.len()
    }

    /// Get the number of entries in the cache
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for DeduplicationCache {
    fn default() -> Self {
        Self::new()
    }
}
