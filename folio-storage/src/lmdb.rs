//! LMDB-backed persistent store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store for the persistent cache tier.
//!
//! # Layout
//!
//! Every partition is its own named LMDB database, so clearing or sizing a
//! partition never scans unrelated keys. A registry database lists the
//! partitions that have been created, because LMDB offers no cheap way to
//! enumerate named databases.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get`, `keys`, `size_of` and `partitions`
//! - Write transactions for `put`, `delete`, `clear` and partition creation
//! - Database handles are opened once and cached behind a lock

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use folio_core::{FolioError, FolioResult, StorageError};
use heed::types::{Bytes, Str, Unit};
use heed::{Database, Env, EnvOpenOptions};

use crate::store::{check_partition_name, KeyValueStore};
use crate::sync::{read, write};

/// Name of the database listing every partition.
const REGISTRY_DB: &str = "__folio_partitions";

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database {name}: {reason}")]
    DbOpen { name: String, reason: String },

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StorageError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::EnvOpen(reason) => StorageError::OpenFailed {
                path: String::new(),
                reason,
            },
            LmdbStoreError::DbOpen { name, reason } => StorageError::PartitionUnavailable {
                partition: name,
                reason,
            },
            LmdbStoreError::Transaction(reason) => StorageError::TransactionFailed { reason },
            LmdbStoreError::Io(e) => StorageError::Io {
                reason: e.to_string(),
            },
        }
    }
}

/// Convert LmdbStoreError to FolioError.
impl From<LmdbStoreError> for FolioError {
    fn from(e: LmdbStoreError) -> Self {
        FolioError::Storage(e.into())
    }
}

/// LMDB environment settings.
#[derive(Debug, Clone)]
pub struct LmdbStoreConfig {
    /// Directory holding the LMDB files. Created if missing.
    pub path: PathBuf,
    /// Maximum size of the memory map in megabytes.
    pub map_size_mb: usize,
    /// Maximum number of partitions (named databases).
    pub max_partitions: u32,
}

impl LmdbStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map_size_mb: 512,
            max_partitions: 64,
        }
    }

    /// Set the map size.
    pub fn with_map_size_mb(mut self, map_size_mb: usize) -> Self {
        self.map_size_mb = map_size_mb;
        self
    }

    /// Set the partition limit.
    pub fn with_max_partitions(mut self, max_partitions: u32) -> Self {
        self.max_partitions = max_partitions;
        self
    }
}

/// LMDB-backed [`KeyValueStore`].
///
/// # Example
///
/// ```ignore
/// use folio_storage::{LmdbStore, LmdbStoreConfig};
///
/// let store = LmdbStore::open(LmdbStoreConfig::new("/var/lib/app/cache"))?;
/// store.put("book_42", "books", &bytes).await?;
/// ```
pub struct LmdbStore {
    /// The LMDB environment.
    env: Env,
    /// Partition registry.
    registry: Database<Str, Unit>,
    /// Handles of partitions opened so far.
    partitions: RwLock<HashMap<String, Database<Str, Bytes>>>,
}

impl LmdbStore {
    /// Open (or create) a store.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - The partition registry cannot be created
    pub fn open(config: LmdbStoreConfig) -> Result<Self, LmdbStoreError> {
        Self::new(&config.path, config.map_size_mb, config.max_partitions)
    }

    /// Open a store at `path` with the given map size and partition limit.
    pub fn new<P: AsRef<Path>>(
        path: P,
        map_size_mb: usize,
        max_partitions: u32,
    ) -> Result<Self, LmdbStoreError> {
        // Ensure directory exists
        std::fs::create_dir_all(&path)?;

        // One extra slot for the registry itself
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(max_partitions.saturating_add(1))
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let registry: Database<Str, Unit> = env
            .create_database(&mut wtxn, Some(REGISTRY_DB))
            .map_err(|e| LmdbStoreError::DbOpen {
                name: REGISTRY_DB.to_string(),
                reason: e.to_string(),
            })?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        tracing::info!(
            path = %path.as_ref().display(),
            map_size_mb,
            max_partitions,
            "LMDB store opened"
        );

        Ok(Self {
            env,
            registry,
            partitions: RwLock::new(HashMap::new()),
        })
    }

    /// Handle for an existing partition, or `None` if it was never created.
    fn existing_partition(
        &self,
        partition: &str,
    ) -> Result<Option<Database<Str, Bytes>>, LmdbStoreError> {
        if let Some(db) = read(&self.partitions).get(partition) {
            return Ok(Some(*db));
        }

        let registered = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            self.registry
                .get(&rtxn, partition)
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
                .is_some()
        };

        if registered {
            self.partition_for_write(partition).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Handle for a partition, creating and registering it if needed.
    ///
    /// Databases are opened inside a write transaction so the handle stays
    /// valid for the life of the environment.
    fn partition_for_write(&self, partition: &str) -> Result<Database<Str, Bytes>, LmdbStoreError> {
        if let Some(db) = read(&self.partitions).get(partition) {
            return Ok(*db);
        }

        let mut handles = write(&self.partitions);
        if let Some(db) = handles.get(partition) {
            return Ok(*db);
        }

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Str, Bytes> = self
            .env
            .create_database(&mut wtxn, Some(partition))
            .map_err(|e| LmdbStoreError::DbOpen {
                name: partition.to_string(),
                reason: e.to_string(),
            })?;

        self.registry
            .put(&mut wtxn, partition, &())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        tracing::debug!(partition, "LMDB partition opened");
        handles.insert(partition.to_string(), db);
        Ok(db)
    }

    fn put_sync(&self, key: &str, partition: &str, bytes: &[u8]) -> Result<(), LmdbStoreError> {
        let db = self.partition_for_write(partition)?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        db.put(&mut wtxn, key, bytes)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }

    fn get_sync(&self, key: &str, partition: &str) -> Result<Option<Vec<u8>>, LmdbStoreError> {
        let Some(db) = self.existing_partition(partition)? else {
            return Ok(None);
        };

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let value = db
            .get(&rtxn, key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(value.map(<[u8]>::to_vec))
    }

    fn delete_sync(&self, key: &str, partition: &str) -> Result<bool, LmdbStoreError> {
        let Some(db) = self.existing_partition(partition)? else {
            return Ok(false);
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let deleted = db
            .delete(&mut wtxn, key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(deleted)
    }

    /// Fold over every record of a partition inside one read transaction.
    fn fold_partition<A>(
        &self,
        partition: &str,
        init: A,
        mut f: impl FnMut(A, &str, &[u8]) -> A,
    ) -> Result<A, LmdbStoreError> {
        let Some(db) = self.existing_partition(partition)? else {
            return Ok(init);
        };

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let iter = db
            .iter(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut acc = init;
        for result in iter {
            let (key, value) = result.map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            acc = f(acc, key, value);
        }
        Ok(acc)
    }

    fn clear_sync(&self, partition: &str) -> Result<u64, LmdbStoreError> {
        let Some(db) = self.existing_partition(partition)? else {
            return Ok(0);
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let removed = db
            .len(&wtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        db.clear(&mut wtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(removed)
    }

    fn partitions_sync(&self) -> Result<Vec<String>, LmdbStoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let iter = self
            .registry
            .iter(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut names = Vec::new();
        for result in iter {
            let (name, ()) = result.map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            names.push(name.to_string());
        }
        Ok(names)
    }
}

#[async_trait]
impl KeyValueStore for LmdbStore {
    async fn put(&self, key: &str, partition: &str, bytes: &[u8]) -> FolioResult<()> {
        check_partition_name(partition)?;
        Ok(self.put_sync(key, partition, bytes)?)
    }

    async fn get(&self, key: &str, partition: &str) -> FolioResult<Option<Vec<u8>>> {
        Ok(self.get_sync(key, partition)?)
    }

    async fn delete(&self, key: &str, partition: &str) -> FolioResult<bool> {
        Ok(self.delete_sync(key, partition)?)
    }

    async fn keys(&self, partition: &str) -> FolioResult<Vec<String>> {
        Ok(self.fold_partition(partition, Vec::new(), |mut keys, key, _| {
            keys.push(key.to_string());
            keys
        })?)
    }

    async fn size_of(&self, partition: &str) -> FolioResult<u64> {
        Ok(self.fold_partition(partition, 0u64, |total, key, value| {
            total + (key.len() + value.len()) as u64
        })?)
    }

    async fn clear(&self, partition: &str) -> FolioResult<u64> {
        Ok(self.clear_sync(partition)?)
    }

    async fn partitions(&self) -> FolioResult<Vec<String>> {
        Ok(self.partitions_sync()?)
    }
}
