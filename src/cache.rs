// src/cache.rs
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::models::{AggregationResult, ParticipantAddress};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: AggregationResult,
    pub computed_at: Instant,
    pub computed_at_utc: DateTime<Utc>,
}

/// In-memory TTL cache of aggregation results, keyed by participant address.
///
/// Entries are replaced as whole values under a write lock, so readers never
/// observe a half-updated result. Expired entries are treated as absent on
/// read and reclaimed by [`ResultCache::purge_expired`].
pub struct ResultCache {
    ttl: Duration,
    entries: RwLock<HashMap<ParticipantAddress, CacheEntry>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, or `None` if never computed or expired.
    pub fn get(&self, key: &ParticipantAddress) -> Option<AggregationResult> {
        self.get_entry(key).map(|entry| entry.value)
    }

    pub fn get_entry(&self, key: &ParticipantAddress) -> Option<CacheEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| entry.computed_at.elapsed() < self.ttl)
            .cloned()
    }

    /// Overwrite the entry for `key`, stamping it with the current time.
    pub fn put(&self, key: ParticipantAddress, value: AggregationResult) -> CacheEntry {
        let entry = CacheEntry {
            value,
            computed_at: Instant::now(),
            computed_at_utc: Utc::now(),
        };
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, entry.clone());
        entry
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.computed_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
