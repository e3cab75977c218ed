//! Priority-based eviction of the persistent tier.
//!
//! Priorities belong to logical documents (books), not to cache entries. An
//! entry inherits the priority of the document named in its metadata; entries
//! without a document, or whose document has no record, count as
//! [`PriorityLevel::Normal`].
//!
//! Eviction order is lowest level first, then least recently accessed
//! document, then least recently accessed entry. Pinned entries are never
//! candidates.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use folio_core::{BookPriority, EntryMetadata, FolioResult, PriorityLevel, Timestamp};

use crate::persistent::PersistentStore;
use crate::sync::{read, write};

/// Outcome of one eviction batch.
#[derive(Debug, Clone, Default)]
pub struct EvictionReport {
    /// Metadata of every evicted entry, in eviction order.
    pub evicted: Vec<EntryMetadata>,
    /// Sum of the evicted entries' `size_bytes`.
    pub bytes_freed: u64,
}

/// Sort key of an eviction candidate.
struct Rank<'a> {
    level: PriorityLevel,
    document_access: Timestamp,
    entry_access: Timestamp,
    key: &'a str,
}

impl Rank<'_> {
    fn compare(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then(self.document_access.cmp(&other.document_access))
            .then(self.entry_access.cmp(&other.entry_access))
            .then(self.key.cmp(other.key))
    }
}

/// Choose which entries to evict to free `bytes_to_free`.
///
/// Walks the unpinned entries in eviction order until the freed total reaches
/// `bytes_to_free` or candidates run out.
pub fn select_candidates(
    entries: &[EntryMetadata],
    priorities: &HashMap<String, BookPriority>,
    bytes_to_free: u64,
) -> Vec<EntryMetadata> {
    if bytes_to_free == 0 {
        return Vec::new();
    }

    let mut ranked: Vec<(Rank<'_>, &EntryMetadata)> = entries
        .iter()
        .filter(|meta| !meta.is_pinned)
        .map(|meta| {
            let priority = meta
                .document_id
                .as_deref()
                .and_then(|doc| priorities.get(doc));
            let rank = Rank {
                level: priority.map(|p| p.level).unwrap_or_default(),
                document_access: priority
                    .map(|p| p.last_access_timestamp)
                    .unwrap_or(meta.last_access_at),
                entry_access: meta.last_access_at,
                key: &meta.original_key,
            };
            (rank, meta)
        })
        .collect();

    ranked.sort_by(|a, b| a.0.compare(&b.0));

    let mut freed = 0u64;
    let mut selected = Vec::new();
    for (_, meta) in ranked {
        if freed >= bytes_to_free {
            break;
        }
        freed = freed.saturating_add(meta.size_bytes);
        selected.push(meta.clone());
    }
    selected
}

/// Tracks document priorities and evicts from the persistent tier.
///
/// The full priority map is loaded at startup and every change is persisted
/// immediately, one record at a time.
pub struct PriorityEvictionManager {
    persistent: PersistentStore,
    priorities: RwLock<HashMap<String, BookPriority>>,
}

impl PriorityEvictionManager {
    /// Load every persisted priority record.
    pub async fn load(persistent: PersistentStore) -> FolioResult<Self> {
        let priorities = persistent.load_priorities().await?;
        tracing::debug!(documents = priorities.len(), "Loaded document priorities");
        Ok(Self {
            persistent,
            priorities: RwLock::new(priorities),
        })
    }

    /// Set a document's priority level, creating its record if needed.
    pub async fn update_priority(
        &self,
        document_id: &str,
        level: PriorityLevel,
    ) -> FolioResult<BookPriority> {
        let updated = {
            let mut priorities = write(&self.priorities);
            let record = priorities
                .entry(document_id.to_string())
                .or_insert_with(|| BookPriority::new(document_id, level));
            record.level = level;
            record.clone()
        };
        self.persistent.save_priority(&updated).await?;
        Ok(updated)
    }

    /// Record an access that signals the document matters (e.g. opening it).
    pub async fn record_access(&self, document_id: &str) -> FolioResult<BookPriority> {
        let updated = {
            let mut priorities = write(&self.priorities);
            let record = priorities
                .entry(document_id.to_string())
                .or_insert_with(|| BookPriority::new(document_id, PriorityLevel::default()));
            record.touch_at(Utc::now());
            record.clone()
        };
        self.persistent.save_priority(&updated).await?;
        Ok(updated)
    }

    pub fn priority_of(&self, document_id: &str) -> Option<BookPriority> {
        read(&self.priorities).get(document_id).cloned()
    }

    /// Copy of the whole priority map.
    pub fn snapshot(&self) -> HashMap<String, BookPriority> {
        read(&self.priorities).clone()
    }

    /// Evict unpinned entries, lowest priority and oldest first, until
    /// `bytes_to_free` bytes of entries are gone or nothing is left to evict.
    pub async fn evict_low_priority_items(&self, bytes_to_free: u64) -> FolioResult<EvictionReport> {
        let entries = self.persistent.all_metadata().await?;
        let priorities = self.snapshot();
        let candidates = select_candidates(&entries, &priorities, bytes_to_free);

        let mut report = EvictionReport::default();
        for meta in candidates {
            self.persistent.remove_entry(&meta).await?;
            report.bytes_freed = report.bytes_freed.saturating_add(meta.size_bytes);
            report.evicted.push(meta);
        }

        if report.bytes_freed < bytes_to_free {
            tracing::warn!(
                requested = bytes_to_free,
                freed = report.bytes_freed,
                "Priority eviction ran out of candidates"
            );
        }

        Ok(report)
    }
}
