//! Cache metrics observer.
//!
//! The engine reports hits, misses, writes, evictions and partition purges
//! to a [`MetricsObserver`] supplied by the host. Recording is best-effort and
//! must not block: observers are called from inside read and write paths.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why an entry left a cache tier without being explicitly removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// Memory tier exceeded its byte cap.
    MemoryPressure,
    /// TTL sweep removed an expired entry.
    Expired,
    /// Persistent tier exceeded its ceiling; the entry belonged to a
    /// low-priority or long-unused document.
    LowPriority,
}

impl EvictionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MemoryPressure => "memory_pressure",
            Self::Expired => "expired",
            Self::LowPriority => "low_priority",
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of cache events.
pub trait MetricsObserver: Send + Sync {
    fn record_hit(&self, key: &str);
    fn record_miss(&self, key: &str);
    fn record_write(&self, key: &str);
    fn record_eviction(&self, key: &str, reason: EvictionReason);
    /// A whole partition was cleared.
    fn record_box_purge(&self, partition: &str);
}

/// Observer that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsObserver for NoopMetrics {
    fn record_hit(&self, _key: &str) {}
    fn record_miss(&self, _key: &str) {}
    fn record_write(&self, _key: &str) {}
    fn record_eviction(&self, _key: &str, _reason: EvictionReason) {}
    fn record_box_purge(&self, _partition: &str) {}
}

// ============================================================================
// COUNTERS
// ============================================================================

/// Observer keeping process-wide counters.
///
/// These counters track cache activity and can be exported by the host.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
    pub evictions: AtomicU64,
    pub box_purges: AtomicU64,
}

impl CacheMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            box_purges: self.box_purges.load(Ordering::Relaxed),
        }
    }
}

impl MetricsObserver for CacheMetrics {
    fn record_hit(&self, _key: &str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self, _key: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self, _key: &str) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self, _key: &str, _reason: EvictionReason) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_box_purge(&self, _partition: &str) {
        self.box_purges.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of cache counters at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of writes to both tiers.
    pub writes: u64,
    /// Number of entries evicted from either tier.
    pub evictions: u64,
    /// Number of partitions cleared.
    pub box_purges: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
