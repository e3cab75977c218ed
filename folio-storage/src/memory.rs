//! In-process memory tier.
//!
//! A size-accounted LRU of live values. Each entry carries its
//! [`EntryMetadata`]; the metadata's `size_bytes` is what the tier accounts.
//! The LRU order, the byte counter and the consumer side table are guarded by
//! one mutex and always updated together.
//!
//! # Eviction
//!
//! After a `put` pushes the total above the cap, least-recently-used entries
//! are evicted in one batch. The batch is planned up front from the current
//! LRU order:
//!
//! 1. entries are evicted until the total is back under the cap
//! 2. further entries are evicted while the total is above the target ratio,
//!    as long as evicting the next entry does not take the total below it
//!
//! The entry just written is never part of its own eviction batch.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use folio_core::{CacheConfig, EntryMetadata, Timestamp};
use lru::LruCache;

use crate::sync::lock;

type AnyValue = Arc<dyn Any + Send + Sync>;

struct MemoryEntry {
    value: AnyValue,
    metadata: EntryMetadata,
}

struct MemoryState {
    entries: LruCache<String, MemoryEntry>,
    total_bytes: u64,
    /// consumer id -> keys associated with it
    consumers: HashMap<String, HashSet<String>>,
}

impl MemoryState {
    fn take(&mut self, key: &str) -> Option<MemoryEntry> {
        let entry = self.entries.pop(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.metadata.size_bytes);
        self.consumers.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
        Some(entry)
    }
}

/// Bounded LRU cache of typed values.
pub struct MemoryCache {
    state: Mutex<MemoryState>,
    max_bytes: u64,
    target_bytes: u64,
    default_ttl: Duration,
}

impl MemoryCache {
    /// Create a cache with a hard cap, an eviction target and the TTL used
    /// for entries whose metadata carries none.
    pub fn new(max_bytes: u64, target_bytes: u64, default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                consumers: HashMap::new(),
            }),
            max_bytes,
            target_bytes: target_bytes.min(max_bytes),
            default_ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.memory_max_bytes,
            config.memory_target_bytes(),
            config.default_ttl,
        )
    }

    /// Look up a live value.
    ///
    /// Expired entries are a miss and are dropped on the spot unless pinned.
    /// A value stored under a different type is a miss as well. A hit moves
    /// the entry to the most-recently-used end and records the access.
    pub fn get<T: Clone + 'static>(&self, key: &str) -> Option<(T, EntryMetadata)> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at<T: Clone + 'static>(&self, key: &str, now: Timestamp) -> Option<(T, EntryMetadata)> {
        let mut state = lock(&self.state);

        let (expired, pinned) = {
            let entry = state.entries.peek(key)?;
            (
                entry.metadata.is_expired_at(now, self.default_ttl),
                entry.metadata.is_pinned,
            )
        };

        if expired {
            if !pinned {
                state.take(key);
                tracing::debug!(key, "Dropped expired memory entry");
            }
            return None;
        }

        let entry = state.entries.get_mut(key)?;
        let value = entry.value.downcast_ref::<T>()?.clone();
        entry.metadata.touch_at(now);
        Some((value, entry.metadata.clone()))
    }

    /// Insert or replace a value. Returns the keys evicted to make room.
    pub fn put<T: Send + Sync + 'static>(
        &self,
        key: &str,
        value: T,
        metadata: EntryMetadata,
    ) -> Vec<String> {
        let mut state = lock(&self.state);

        // Replace = remove then insert, so the old size is released and the
        // key moves to the most-recently-used end.
        if let Some(old) = state.entries.pop(key) {
            state.total_bytes = state.total_bytes.saturating_sub(old.metadata.size_bytes);
        }

        state.total_bytes = state.total_bytes.saturating_add(metadata.size_bytes);
        state.entries.push(
            key.to_string(),
            MemoryEntry {
                value: Arc::new(value),
                metadata,
            },
        );

        if state.total_bytes <= self.max_bytes {
            return Vec::new();
        }

        let victims = self.plan_eviction(&state, key);
        for victim in &victims {
            state.take(victim);
        }

        if state.total_bytes > self.max_bytes {
            tracing::warn!(
                key,
                total_bytes = state.total_bytes,
                max_bytes = self.max_bytes,
                "Memory tier still over cap after eviction"
            );
        } else if !victims.is_empty() {
            tracing::debug!(
                evicted = victims.len(),
                total_bytes = state.total_bytes,
                "Memory tier evicted least-recently-used entries"
            );
        }

        victims
    }

    /// Oldest-first eviction batch, computed from a snapshot of the LRU order.
    fn plan_eviction(&self, state: &MemoryState, protected: &str) -> Vec<String> {
        let mut projected = state.total_bytes;
        let mut victims = Vec::new();

        // `iter` runs most- to least-recently used.
        for (key, entry) in state.entries.iter().rev() {
            if projected <= self.target_bytes {
                break;
            }
            if key == protected {
                continue;
            }
            let size = entry.metadata.size_bytes;
            let over_cap = projected > self.max_bytes;
            if !over_cap && projected.saturating_sub(size) < self.target_bytes {
                break;
            }
            projected = projected.saturating_sub(size);
            victims.push(key.clone());
        }

        victims
    }

    /// Remove an entry and its consumer associations.
    pub fn remove(&self, key: &str) -> Option<EntryMetadata> {
        lock(&self.state).take(key).map(|entry| entry.metadata)
    }

    /// Mark an access without reading the value.
    pub fn touch(&self, key: &str) -> bool {
        let mut state = lock(&self.state);
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.metadata.touch();
                true
            }
            None => false,
        }
    }

    /// Metadata of an entry, without affecting LRU order.
    pub fn metadata(&self, key: &str) -> Option<EntryMetadata> {
        lock(&self.state)
            .entries
            .peek(key)
            .map(|entry| entry.metadata.clone())
    }

    /// Update the pin flag of a resident entry.
    pub fn set_pinned(&self, key: &str, pinned: bool) -> bool {
        let mut state = lock(&self.state);
        match state.entries.peek_mut(key) {
            Some(entry) => {
                entry.metadata.is_pinned = pinned;
                true
            }
            None => false,
        }
    }

    /// Drop every expired, unpinned entry. Returns the keys removed.
    pub fn remove_expired(&self) -> Vec<String> {
        self.remove_expired_at(Utc::now())
    }

    pub fn remove_expired_at(&self, now: Timestamp) -> Vec<String> {
        self.remove_where(|meta| !meta.is_pinned && meta.is_expired_at(now, self.default_ttl))
    }

    /// Remove every entry whose metadata matches. Returns the keys removed.
    pub fn remove_where(&self, mut predicate: impl FnMut(&EntryMetadata) -> bool) -> Vec<String> {
        let mut state = lock(&self.state);
        let keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| predicate(&entry.metadata))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            state.take(key);
        }
        keys
    }

    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.entries.clear();
        state.total_bytes = 0;
        state.consumers.clear();
    }

    // ========================================================================
    // CONSUMERS
    // ========================================================================

    /// Tag a resident entry as used by `consumer` (e.g. a screen).
    pub fn associate(&self, key: &str, consumer: &str) -> bool {
        let mut state = lock(&self.state);
        if !state.entries.contains(key) {
            return false;
        }
        state
            .consumers
            .entry(consumer.to_string())
            .or_default()
            .insert(key.to_string());
        true
    }

    /// Forget every association of `consumer`. Entries stay cached.
    ///
    /// Returns the number of associations dropped.
    pub fn release_consumer(&self, consumer: &str) -> usize {
        lock(&self.state)
            .consumers
            .remove(consumer)
            .map(|keys| keys.len())
            .unwrap_or(0)
    }

    /// Consumers associated with a key, sorted.
    pub fn consumers_of(&self, key: &str) -> Vec<String> {
        let state = lock(&self.state);
        let mut consumers: Vec<String> = state
            .consumers
            .iter()
            .filter(|(_, keys)| keys.contains(key))
            .map(|(consumer, _)| consumer.clone())
            .collect();
        consumers.sort();
        consumers
    }

    // ========================================================================
    // STATS
    // ========================================================================

    pub fn size_bytes(&self) -> u64 {
        lock(&self.state).total_bytes
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Accounted bytes over the cap. May exceed 1.0 briefly.
    pub fn fill_ratio(&self) -> f64 {
        if self.max_bytes == 0 {
            return 1.0;
        }
        self.size_bytes() as f64 / self.max_bytes as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn meta(key: &str, size: u64) -> EntryMetadata {
        EntryMetadata::new(key, "books", size, None)
    }

    fn cache(max: u64) -> MemoryCache {
        MemoryCache::new(max, (max as f64 * 0.7) as u64, HOUR)
    }

    fn accounted_matches_entries(cache: &MemoryCache) -> bool {
        let state = lock(&cache.state);
        let sum: u64 = state
            .entries
            .iter()
            .map(|(_, entry)| entry.metadata.size_bytes)
            .sum();
        sum == state.total_bytes
    }

    #[test]
    fn test_put_and_get() {
        let cache = cache(1000);
        cache.put("book_1", "Dune".to_string(), meta("book_1", 10));

        let (value, metadata) = cache.get::<String>("book_1").expect("entry should be cached");
        assert_eq!(value, "Dune");
        assert_eq!(metadata.access_count, 2);
        assert_eq!(cache.size_bytes(), 10);
    }

    #[test]
    fn test_wrong_type_is_a_miss() {
        let cache = cache(1000);
        cache.put("book_1", 7u32, meta("book_1", 4));
        assert!(cache.get::<String>("book_1").is_none());
        assert!(cache.get::<u32>("book_1").is_some());
    }

    #[test]
    fn test_overwrite_does_not_inflate_size() {
        let cache = cache(1000);
        cache.put("k", 1u8, meta("k", 40));
        cache.put("k", 2u8, meta("k", 30));
        assert_eq!(cache.size_bytes(), 30);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get::<u8>("k").map(|(v, _)| v), Some(2));
    }

    #[test]
    fn test_eviction_to_target() {
        // cap 100, target 70; three 40-byte entries
        let cache = cache(100);
        assert!(cache.put("x", 1u8, meta("x", 40)).is_empty());
        assert!(cache.put("y", 2u8, meta("y", 40)).is_empty());
        let evicted = cache.put("z", 3u8, meta("z", 40));

        assert_eq!(evicted, vec!["x"]);
        assert!(cache.get::<u8>("x").is_none());
        assert!(cache.get::<u8>("y").is_some());
        assert!(cache.get::<u8>("z").is_some());
        assert_eq!(cache.size_bytes(), 80);
    }

    #[test]
    fn test_eviction_drains_small_entries_toward_target() {
        let cache = cache(100);
        for i in 0..10 {
            cache.put(&format!("k{}", i), i, meta(&format!("k{}", i), 10));
        }
        let evicted = cache.put("big", 0u8, meta("big", 30));

        // 130 bytes -> drain to 70 by evicting the six oldest
        assert_eq!(evicted, vec!["k0", "k1", "k2", "k3", "k4", "k5"]);
        assert_eq!(cache.size_bytes(), 70);
    }

    #[test]
    fn test_recent_access_protects_from_eviction() {
        let cache = cache(100);
        cache.put("a", 1u8, meta("a", 40));
        cache.put("b", 2u8, meta("b", 40));
        assert!(cache.get::<u8>("a").is_some());

        let evicted = cache.put("c", 3u8, meta("c", 40));
        assert_eq!(evicted, vec!["b"]);
        assert!(cache.get::<u8>("a").is_some());
    }

    #[test]
    fn test_oversized_entry_is_kept() {
        let cache = cache(100);
        cache.put("a", 1u8, meta("a", 20));
        let evicted = cache.put("huge", 2u8, meta("huge", 150));
        assert_eq!(evicted, vec!["a"]);
        assert!(cache.get::<u8>("huge").is_some());
    }

    #[test]
    fn test_expired_entries_are_dropped_on_read() {
        let cache = cache(1000);
        let created = Utc::now();
        let metadata = EntryMetadata::new_at("k", "books", 5, Some(Duration::from_secs(10)), created);
        cache.put("k", 1u8, metadata);

        let later = created + chrono::Duration::seconds(11);
        assert!(cache.get_at::<u8>("k", later).is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_expired_pinned_entries_stay_resident() {
        let cache = cache(1000);
        let created = Utc::now();
        let metadata = EntryMetadata::new_at("k", "books", 5, Some(Duration::from_secs(10)), created)
            .with_pinned(true);
        cache.put("k", 1u8, metadata);

        let later = created + chrono::Duration::seconds(11);
        assert!(cache.get_at::<u8>("k", later).is_none());
        assert_eq!(cache.len(), 1);
        assert!(cache.remove_expired_at(later).is_empty());
    }

    #[test]
    fn test_remove_expired_skips_fresh() {
        let cache = cache(1000);
        let created = Utc::now();
        cache.put(
            "old",
            1u8,
            EntryMetadata::new_at("old", "b", 5, Some(Duration::from_secs(1)), created),
        );
        cache.put("new", 2u8, EntryMetadata::new_at("new", "b", 5, None, created));

        let removed = cache.remove_expired_at(created + chrono::Duration::seconds(5));
        assert_eq!(removed, vec!["old"]);
        assert_eq!(cache.size_bytes(), 5);
    }

    #[test]
    fn test_remove_where_by_partition() {
        let cache = cache(1000);
        cache.put("a", 1u8, EntryMetadata::new("a", "books", 1, None));
        cache.put("b", 1u8, EntryMetadata::new("b", "shelves", 1, None));

        let removed = cache.remove_where(|m| m.box_name == "books");
        assert_eq!(removed, vec!["a"]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_consumer_release_keeps_entry() {
        let cache = cache(1000);
        cache.put("a", 1u8, meta("a", 1));
        cache.put("b", 1u8, meta("b", 1));

        assert!(cache.associate("a", "reader_screen"));
        assert!(cache.associate("b", "reader_screen"));
        assert!(cache.associate("a", "library_screen"));
        assert!(!cache.associate("missing", "reader_screen"));
        assert_eq!(cache.consumers_of("a"), vec!["library_screen", "reader_screen"]);

        assert_eq!(cache.release_consumer("reader_screen"), 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.consumers_of("a"), vec!["library_screen"]);
    }

    #[test]
    fn test_remove_drops_associations() {
        let cache = cache(1000);
        cache.put("a", 1u8, meta("a", 1));
        cache.associate("a", "reader_screen");

        assert!(cache.remove("a").is_some());
        assert!(cache.consumers_of("a").is_empty());
        assert_eq!(cache.release_consumer("reader_screen"), 0);
    }

    #[test]
    fn test_set_pinned_and_touch() {
        let cache = cache(1000);
        cache.put("a", 1u8, meta("a", 1));
        assert!(cache.set_pinned("a", true));
        assert!(cache.touch("a"));

        let metadata = cache.metadata("a").expect("entry should exist");
        assert!(metadata.is_pinned);
        assert_eq!(metadata.access_count, 2);
        assert!(!cache.set_pinned("missing", true));
    }

    #[test]
    fn test_fill_ratio() {
        let cache = cache(200);
        cache.put("a", 1u8, meta("a", 50));
        assert!((cache.fill_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8, u64),
        Get(u8),
        Remove(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..8, 1u64..60).prop_map(|(k, s)| Op::Put(k, s)),
            (0u8..8).prop_map(Op::Get),
            (0u8..8).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_accounting_matches_entries(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let cache = cache(150);
            for op in ops {
                match op {
                    Op::Put(k, size) => {
                        let key = format!("k{}", k);
                        cache.put(&key, k, meta(&key, size));
                    }
                    Op::Get(k) => {
                        let _ = cache.get::<u8>(&format!("k{}", k));
                    }
                    Op::Remove(k) => {
                        let _ = cache.remove(&format!("k{}", k));
                    }
                }
                prop_assert!(accounted_matches_entries(&cache));
                // Entries are < 60 bytes, so the cap always holds after a put
                prop_assert!(cache.size_bytes() <= 150);
            }
        }
    }
}
