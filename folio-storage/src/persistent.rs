//! Persistent tier adapter.
//!
//! Wraps a [`KeyValueStore`] with the cache's own bookkeeping. Content lives
//! in caller-named partitions; three reserved partitions hold the state that
//! must survive a restart:
//!
//! | partition                | key          | value                          |
//! |--------------------------|--------------|--------------------------------|
//! | `cache_metadata`         | cache key    | JSON [`EntryMetadata`]         |
//! | `book_priorities`        | document id  | JSON [`BookPriority`]          |
//! | `pending_pin_operations` | operation id | JSON [`PendingPinOperation`]   |
//!
//! Every write goes through this adapter, so it also keeps a running count
//! of the bytes the store holds. The count is measured once with a full scan
//! and adjusted per write after that; see [`PersistentStore::used_bytes`].
//!
//! [`PendingPinOperation`]: folio_core::PendingPinOperation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use folio_core::{BookPriority, EntryMetadata, FolioError, FolioResult, StorageError};
use serde::de::DeserializeOwned;

use crate::store::KeyValueStore;

/// Partition holding one metadata record per cached key.
pub const METADATA_PARTITION: &str = "cache_metadata";

/// Partition holding one priority record per document.
pub const PRIORITY_PARTITION: &str = "book_priorities";

/// Partition holding queued pin/unpin operations.
pub const PIN_QUEUE_PARTITION: &str = "pending_pin_operations";

const RESERVED_PARTITIONS: [&str; 3] = [METADATA_PARTITION, PRIORITY_PARTITION, PIN_QUEUE_PARTITION];

/// Whether `partition` is owned by the cache itself.
pub fn is_reserved(partition: &str) -> bool {
    RESERVED_PARTITIONS.contains(&partition)
}

/// Size of one record as the stores account it.
fn record_len(key: &str, bytes: &[u8]) -> u64 {
    (key.len() + bytes.len()) as u64
}

// ============================================================================
// BYTE COUNTER
// ============================================================================

/// Running total of stored bytes.
#[derive(Debug, Default)]
struct UsedBytes {
    bytes: AtomicU64,
    measured: AtomicBool,
}

impl UsedBytes {
    fn current(&self) -> Option<u64> {
        self.measured
            .load(Ordering::Acquire)
            .then(|| self.bytes.load(Ordering::Acquire))
    }

    fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::Release);
        self.measured.store(true, Ordering::Release);
    }

    /// Replace a record of `old` bytes with one of `new` bytes.
    fn replace(&self, old: u64, new: u64) {
        // Infallible: the closure always returns Some
        let _ = self
            .bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bytes| {
                Some(bytes.saturating_sub(old).saturating_add(new))
            });
    }

    /// Forget the count; the next read re-measures.
    fn invalidate(&self) {
        self.measured.store(false, Ordering::Release);
    }
}

/// Partition-aware view of the persistent store.
#[derive(Clone)]
pub struct PersistentStore {
    store: Arc<dyn KeyValueStore>,
    used: Arc<UsedBytes>,
}

impl PersistentStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            used: Arc::new(UsedBytes::default()),
        }
    }

    /// Reject writes that target a reserved partition.
    pub fn ensure_content_partition(partition: &str) -> FolioResult<()> {
        if is_reserved(partition) {
            return Err(StorageError::PartitionUnavailable {
                partition: partition.to_string(),
                reason: "partition is reserved for cache bookkeeping".to_string(),
            }
            .into());
        }
        Ok(())
    }

    // ========================================================================
    // CONTENT
    // ========================================================================

    pub async fn put_bytes(&self, key: &str, partition: &str, bytes: &[u8]) -> FolioResult<()> {
        self.put(key, partition, bytes).await
    }

    pub async fn get_bytes(&self, key: &str, partition: &str) -> FolioResult<Option<Vec<u8>>> {
        self.store.get(key, partition).await
    }

    pub async fn delete_bytes(&self, key: &str, partition: &str) -> FolioResult<bool> {
        self.delete(key, partition).await
    }

    pub async fn keys(&self, partition: &str) -> FolioResult<Vec<String>> {
        self.store.keys(partition).await
    }

    /// Remove an entry's content and its metadata record.
    pub async fn remove_entry(&self, metadata: &EntryMetadata) -> FolioResult<()> {
        self.delete(&metadata.original_key, &metadata.box_name).await?;
        self.delete(&metadata.original_key, METADATA_PARTITION).await?;
        Ok(())
    }

    // ========================================================================
    // METADATA
    // ========================================================================

    pub async fn write_metadata(&self, metadata: &EntryMetadata) -> FolioResult<()> {
        let bytes = serde_json::to_vec(metadata).map_err(|e| StorageError::CorruptRecord {
            partition: METADATA_PARTITION.to_string(),
            key: metadata.original_key.clone(),
            reason: e.to_string(),
        })?;
        self.put(&metadata.original_key, METADATA_PARTITION, &bytes).await
    }

    pub async fn read_metadata(&self, key: &str) -> FolioResult<Option<EntryMetadata>> {
        self.read_record(METADATA_PARTITION, key).await
    }

    pub async fn delete_metadata(&self, key: &str) -> FolioResult<bool> {
        self.delete(key, METADATA_PARTITION).await
    }

    /// Every readable metadata record. Corrupt records are skipped.
    pub async fn all_metadata(&self) -> FolioResult<Vec<EntryMetadata>> {
        self.read_all(METADATA_PARTITION).await
    }

    // ========================================================================
    // PRIORITIES
    // ========================================================================

    pub async fn load_priorities(&self) -> FolioResult<HashMap<String, BookPriority>> {
        let records: Vec<BookPriority> = self.read_all(PRIORITY_PARTITION).await?;
        Ok(records
            .into_iter()
            .map(|p| (p.book_id.clone(), p))
            .collect())
    }

    pub async fn save_priority(&self, priority: &BookPriority) -> FolioResult<()> {
        let bytes = serde_json::to_vec(priority).map_err(|e| StorageError::CorruptRecord {
            partition: PRIORITY_PARTITION.to_string(),
            key: priority.book_id.clone(),
            reason: e.to_string(),
        })?;
        self.put(&priority.book_id, PRIORITY_PARTITION, &bytes).await
    }

    // ========================================================================
    // RECORD HELPERS
    // ========================================================================

    /// Read and decode one JSON record from a reserved partition.
    pub(crate) async fn read_record<R: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
    ) -> FolioResult<Option<R>> {
        let Some(bytes) = self.store.get(key, partition).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| corrupt(partition, key, e))
    }

    /// Decode every JSON record in a reserved partition, skipping corrupt ones.
    pub(crate) async fn read_all<R: DeserializeOwned>(&self, partition: &str) -> FolioResult<Vec<R>> {
        let keys = self.store.keys(partition).await?;
        let mut records = Vec::with_capacity(keys.len());

        for key in keys {
            match self.read_record(partition, &key).await {
                Ok(Some(record)) => records.push(record),
                // Removed between listing and reading
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(partition, key = %key, error = %e, "Skipping unreadable record");
                }
            }
        }

        Ok(records)
    }

    pub(crate) async fn put_record(&self, partition: &str, key: &str, bytes: &[u8]) -> FolioResult<()> {
        self.put(key, partition, bytes).await
    }

    pub(crate) async fn delete_record(&self, partition: &str, key: &str) -> FolioResult<bool> {
        self.delete(key, partition).await
    }

    // ========================================================================
    // COUNTED WRITES
    // ========================================================================

    /// Bytes currently stored under `key`, or `None` if unknown.
    async fn stored_len(&self, key: &str, partition: &str) -> Option<u64> {
        match self.store.get(key, partition).await {
            Ok(bytes) => Some(bytes.map_or(0, |b| record_len(key, &b))),
            Err(e) => {
                tracing::debug!(partition, key, error = %e, "Record size unknown, byte count reset");
                None
            }
        }
    }

    async fn put(&self, key: &str, partition: &str, bytes: &[u8]) -> FolioResult<()> {
        let old = self.stored_len(key, partition).await;
        self.store.put(key, partition, bytes).await?;
        match old {
            Some(old) => self.used.replace(old, record_len(key, bytes)),
            None => self.used.invalidate(),
        }
        Ok(())
    }

    async fn delete(&self, key: &str, partition: &str) -> FolioResult<bool> {
        let old = self.stored_len(key, partition).await;
        let deleted = self.store.delete(key, partition).await?;
        match old {
            Some(old) if deleted => self.used.replace(old, 0),
            Some(_) => {}
            None => self.used.invalidate(),
        }
        Ok(deleted)
    }

    async fn clear(&self, partition: &str) -> FolioResult<u64> {
        let old = self.store.size_of(partition).await;
        let removed = self.store.clear(partition).await?;
        match old {
            Ok(old) => self.used.replace(old, 0),
            Err(_) => self.used.invalidate(),
        }
        Ok(removed)
    }

    // ========================================================================
    // BULK OPERATIONS
    // ========================================================================

    /// Clear a content partition and drop the metadata of its entries.
    ///
    /// Returns the keys whose metadata was removed.
    pub async fn clear_partition(&self, partition: &str) -> FolioResult<Vec<String>> {
        Self::ensure_content_partition(partition)?;

        let removed = self.clear(partition).await?;

        let mut dropped = Vec::new();
        for metadata in self.all_metadata().await? {
            if metadata.box_name == partition {
                self.delete(&metadata.original_key, METADATA_PARTITION).await?;
                dropped.push(metadata.original_key);
            }
        }

        tracing::info!(partition, removed, "Partition cleared");
        Ok(dropped)
    }

    /// Clear every content partition, all metadata and the pin queue.
    ///
    /// Document priorities are kept. Returns the content partitions cleared.
    pub async fn clear_all(&self) -> FolioResult<Vec<String>> {
        let mut cleared = Vec::new();
        for partition in self.store.partitions().await? {
            if partition == PRIORITY_PARTITION {
                continue;
            }
            self.clear(&partition).await?;
            if !is_reserved(&partition) {
                cleared.push(partition);
            }
        }

        tracing::info!(partitions = cleared.len(), "Persistent tier cleared");
        Ok(cleared)
    }

    // ========================================================================
    // SIZES
    // ========================================================================

    pub async fn partition_size(&self, partition: &str) -> FolioResult<u64> {
        self.store.size_of(partition).await
    }

    /// Bytes used across every partition, bookkeeping included.
    ///
    /// Scans every record. Prefer [`used_bytes`](Self::used_bytes) on hot
    /// paths.
    pub async fn total_size(&self) -> FolioResult<u64> {
        let mut total = 0u64;
        for partition in self.store.partitions().await? {
            total = total.saturating_add(self.store.size_of(&partition).await?);
        }
        Ok(total)
    }

    /// Running equivalent of [`total_size`](Self::total_size).
    ///
    /// The first call (and the first after a failed size lookup) scans the
    /// store; later calls read the counter. Writes to the same record racing
    /// each other can skew it until [`remeasure`](Self::remeasure). Writes
    /// made through a different adapter over the same store are not seen.
    pub async fn used_bytes(&self) -> FolioResult<u64> {
        match self.used.current() {
            Some(bytes) => Ok(bytes),
            None => self.remeasure().await,
        }
    }

    /// Reset the counter from a full scan.
    pub async fn remeasure(&self) -> FolioResult<u64> {
        let total = self.total_size().await?;
        self.used.set(total);
        tracing::debug!(bytes = total, "Persistent tier measured");
        Ok(total)
    }
}

fn corrupt(partition: &str, key: &str, e: serde_json::Error) -> FolioError {
    StorageError::CorruptRecord {
        partition: partition.to_string(),
        key: key.to_string(),
        reason: e.to_string(),
    }
    .into()
}
