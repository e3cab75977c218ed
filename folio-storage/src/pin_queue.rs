//! Durable queue of offline pin/unpin intents.
//!
//! Operations are appended while offline and never compacted eagerly: a key
//! may have several queued operations and the newest one is resolved at read
//! time. Entries are removed once an authoritative online action supersedes
//! them or reconciliation applies them.

use std::collections::BTreeMap;

use folio_core::{FolioResult, PendingPinOperation, StorageError};
use uuid::Uuid;

use crate::persistent::{PersistentStore, PIN_QUEUE_PARTITION};

/// Pin/unpin intents persisted in the `pending_pin_operations` partition.
#[derive(Clone)]
pub struct OfflinePinQueue {
    persistent: PersistentStore,
}

impl OfflinePinQueue {
    pub fn new(persistent: PersistentStore) -> Self {
        Self { persistent }
    }

    /// Append an operation.
    pub async fn enqueue(&self, operation: &PendingPinOperation) -> FolioResult<()> {
        let key = operation.id.to_string();
        let bytes = serde_json::to_vec(operation).map_err(|e| StorageError::CorruptRecord {
            partition: PIN_QUEUE_PARTITION.to_string(),
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.persistent
            .put_record(PIN_QUEUE_PARTITION, &key, &bytes)
            .await?;

        tracing::debug!(
            key = %operation.item_key,
            operation = ?operation.operation_type,
            "Queued pin operation"
        );
        Ok(())
    }

    /// Every queued operation, oldest first.
    pub async fn all(&self) -> FolioResult<Vec<PendingPinOperation>> {
        let mut operations: Vec<PendingPinOperation> =
            self.persistent.read_all(PIN_QUEUE_PARTITION).await?;
        operations.sort_by(|a, b| (a.timestamp, a.id).cmp(&(b.timestamp, b.id)));
        Ok(operations)
    }

    /// The authoritative (most recent) operation for a key.
    pub async fn latest_for(&self, item_key: &str) -> FolioResult<Option<PendingPinOperation>> {
        let latest = self
            .all()
            .await?
            .into_iter()
            .filter(|op| op.item_key == item_key)
            .reduce(|latest, op| if op.is_newer_than(&latest) { op } else { latest });
        Ok(latest)
    }

    /// The most recent operation of every key, keyed by item key.
    pub async fn latest_per_key(&self) -> FolioResult<BTreeMap<String, PendingPinOperation>> {
        let mut latest: BTreeMap<String, PendingPinOperation> = BTreeMap::new();
        for op in self.all().await? {
            match latest.get(&op.item_key) {
                Some(current) if !op.is_newer_than(current) => {}
                _ => {
                    latest.insert(op.item_key.clone(), op);
                }
            }
        }
        Ok(latest)
    }

    /// Remove one operation. Returns whether it existed.
    pub async fn remove(&self, id: Uuid) -> FolioResult<bool> {
        self.persistent
            .delete_record(PIN_QUEUE_PARTITION, &id.to_string())
            .await
    }

    /// Remove every queued operation for a key. Returns the number removed.
    pub async fn remove_for_key(&self, item_key: &str) -> FolioResult<usize> {
        let mut removed = 0;
        for op in self.all().await? {
            if op.item_key == item_key && self.remove(op.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn len(&self) -> FolioResult<usize> {
        Ok(self.persistent.keys(PIN_QUEUE_PARTITION).await?.len())
    }

    pub async fn is_empty(&self) -> FolioResult<bool> {
        Ok(self.len().await? == 0)
    }
}
