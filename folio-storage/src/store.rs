//! Persistent key-value capability.
//!
//! The persistent tier only needs a handful of per-partition byte operations
//! from the underlying engine. [`KeyValueStore`] names them so the cache can
//! run on LMDB in production and on [`InMemoryStore`] in tests.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use folio_core::{FolioResult, StorageError};

use crate::sync::{read, write};

/// Per-partition byte storage.
///
/// # Partitions
///
/// A partition ("box") is a named namespace of keys. Partitions come into
/// existence on first write; reads and deletes against an unknown partition
/// behave as if it were empty.
///
/// # Atomicity
///
/// Each call is individually atomic. There are no cross-key transactions.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous value.
    async fn put(&self, key: &str, partition: &str, bytes: &[u8]) -> FolioResult<()>;

    /// Read the bytes stored under `key`.
    async fn get(&self, key: &str, partition: &str) -> FolioResult<Option<Vec<u8>>>;

    /// Delete `key`. Returns whether a value was removed.
    async fn delete(&self, key: &str, partition: &str) -> FolioResult<bool>;

    /// All keys in the partition, in ascending order.
    async fn keys(&self, partition: &str) -> FolioResult<Vec<String>>;

    /// Bytes used by the partition (keys plus values).
    async fn size_of(&self, partition: &str) -> FolioResult<u64>;

    /// Remove every key in the partition. Returns the number removed.
    async fn clear(&self, partition: &str) -> FolioResult<u64>;

    /// Names of all partitions that have been written to.
    async fn partitions(&self) -> FolioResult<Vec<String>>;
}

pub(crate) fn check_partition_name(partition: &str) -> Result<(), StorageError> {
    if partition.is_empty() {
        return Err(StorageError::PartitionUnavailable {
            partition: partition.to_string(),
            reason: "partition name must not be empty".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// IN-MEMORY IMPLEMENTATION
// ============================================================================

/// Process-local [`KeyValueStore`].
///
/// Contents do not survive the process. Used for tests and for hosts that
/// want the caching behavior without a disk footprint.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    partitions: RwLock<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn put(&self, key: &str, partition: &str, bytes: &[u8]) -> FolioResult<()> {
        check_partition_name(partition)?;
        write(&self.partitions)
            .entry(partition.to_string())
            .or_default()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str, partition: &str) -> FolioResult<Option<Vec<u8>>> {
        Ok(read(&self.partitions)
            .get(partition)
            .and_then(|p| p.get(key))
            .cloned())
    }

    async fn delete(&self, key: &str, partition: &str) -> FolioResult<bool> {
        Ok(write(&self.partitions)
            .get_mut(partition)
            .map(|p| p.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn keys(&self, partition: &str) -> FolioResult<Vec<String>> {
        Ok(read(&self.partitions)
            .get(partition)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn size_of(&self, partition: &str) -> FolioResult<u64> {
        Ok(read(&self.partitions)
            .get(partition)
            .map(|p| {
                p.iter()
                    .map(|(k, v)| (k.len() + v.len()) as u64)
                    .sum()
            })
            .unwrap_or(0))
    }

    async fn clear(&self, partition: &str) -> FolioResult<u64> {
        Ok(write(&self.partitions)
            .get_mut(partition)
            .map(|p| {
                let removed = p.len() as u64;
                p.clear();
                removed
            })
            .unwrap_or(0))
    }

    async fn partitions(&self) -> FolioResult<Vec<String>> {
        Ok(read(&self.partitions).keys().cloned().collect())
    }
}
