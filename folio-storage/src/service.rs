//! The cache service.
//!
//! [`CacheService`] is the entry point the application holds. It is cheap to
//! clone; every clone shares the same tiers, in-flight registry and
//! maintenance task. It is built explicitly by the composition root and
//! passed down, never reached through global state.
//!
//! # Read path
//!
//! 1. memory tier
//! 2. persistent tier (unless the policy is network-only)
//! 3. network, through the single-flight coordinator, when the policy and
//!    connectivity allow
//!
//! Read operations return a [`CacheResult`] and never a raw error: a failed
//! refresh over cached data yields `Stale` with the error attached.
//!
//! # Write path
//!
//! Writes land in the memory tier first, then in the persistent tier (content
//! then metadata). If the persistent write fails the memory tier may hold a
//! value the persistent tier does not; the next successful write repairs it.
//! After each write the persistent tier is checked against its ceiling and
//! priority eviction runs if needed.

use std::error::Error as StdError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use folio_core::{
    BookPriority, CacheConfig, CachePolicy, CacheResult, Cacheable, DataSource, EntryMetadata,
    FolioError, FolioResult, PendingPinOperation, PinOperation, PriorityLevel,
};
use tokio::sync::{watch, Mutex as AsyncMutex};

use crate::connectivity::{ConnectivityFlag, ConnectivityOracle};
use crate::coordinator::FetchCoordinator;
use crate::eviction::PriorityEvictionManager;
use crate::memory::MemoryCache;
use crate::metrics::{EvictionReason, MetricsObserver, NoopMetrics};
use crate::persistent::PersistentStore;
use crate::pin_queue::OfflinePinQueue;
use crate::policy::{plan_read, CacheLookup, ReadPlan};
use crate::store::KeyValueStore;
use crate::sweep::{spawn_sweep, Maintenance};
use crate::sync::KeyLocks;

// ============================================================================
// WRITE OPTIONS
// ============================================================================

/// Options for [`CacheService::cache_data`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Entry TTL. `None` means the configured default.
    pub ttl: Option<Duration>,
    /// Pin state. `None` keeps the previous entry's state (unpinned if new).
    pub pinned: Option<bool>,
    pub source: DataSource,
    pub e_tag: Option<String>,
    pub version: Option<u64>,
    /// Logical document the entry belongs to. `None` keeps the previous one.
    pub document_id: Option<String>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_pinned(mut self, pinned: bool) -> Self {
        self.pinned = Some(pinned);
        self
    }

    pub fn with_source(mut self, source: DataSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_e_tag(mut self, e_tag: impl Into<String>) -> Self {
        self.e_tag = Some(e_tag.into());
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }
}

// ============================================================================
// SERVICE
// ============================================================================

/// Multi-tier cache service.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(LmdbStore::open(LmdbStoreConfig::new(dir))?);
/// let cache = CacheService::init(
///     CacheConfig::from_env(),
///     store,
///     Arc::new(ConnectivityFlag::online()),
///     Arc::new(CacheMetrics::new()),
/// )
/// .await?;
///
/// let book = cache
///     .fetch("book_42", "books", move || api.get_book(42), None, None)
///     .await;
/// ```
#[derive(Clone)]
pub struct CacheService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: CacheConfig,
    memory: MemoryCache,
    persistent: PersistentStore,
    coordinator: FetchCoordinator,
    priorities: PriorityEvictionManager,
    pin_queue: OfflinePinQueue,
    connectivity: Arc<dyn ConnectivityOracle>,
    metrics: Arc<dyn MetricsObserver>,
    /// Serializes metadata read-modify-write per cache key.
    key_locks: KeyLocks,
    /// Serializes priority eviction batches.
    eviction_lock: AsyncMutex<()>,
    disposed: AtomicBool,
    /// Dropping this stops the maintenance task.
    shutdown_tx: watch::Sender<bool>,
}

impl CacheService {
    /// Build a service over `store`.
    ///
    /// Validates the configuration, loads document priorities and, if
    /// enabled, starts the maintenance task. Must be called from within a
    /// tokio runtime.
    pub async fn init(
        config: CacheConfig,
        store: Arc<dyn KeyValueStore>,
        connectivity: Arc<dyn ConnectivityOracle>,
        metrics: Arc<dyn MetricsObserver>,
    ) -> FolioResult<Self> {
        config.validate()?;

        let persistent = PersistentStore::new(store);
        let priorities = PriorityEvictionManager::load(persistent.clone()).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(ServiceInner {
            memory: MemoryCache::from_config(&config),
            pin_queue: OfflinePinQueue::new(persistent.clone()),
            persistent,
            coordinator: FetchCoordinator::new(),
            priorities,
            connectivity,
            metrics,
            key_locks: KeyLocks::new(),
            eviction_lock: AsyncMutex::new(()),
            disposed: AtomicBool::new(false),
            shutdown_tx,
            config,
        });

        if inner.config.sweep_enabled {
            spawn_sweep(
                Arc::downgrade(&inner),
                inner.config.sweep_intervals.clone(),
                shutdown_rx,
            );
        }

        tracing::info!(
            memory_max_bytes = inner.config.memory_max_bytes,
            persistent_max_bytes = inner.config.persistent_max_bytes,
            default_policy = %inner.config.default_policy,
            sweep_enabled = inner.config.sweep_enabled,
            "Cache service initialized"
        );

        Ok(Self { inner })
    }

    /// Build a service with the default configuration, an always-online
    /// connectivity flag and no metrics.
    pub async fn with_defaults(store: Arc<dyn KeyValueStore>) -> FolioResult<Self> {
        Self::init(
            CacheConfig::default(),
            store,
            Arc::new(ConnectivityFlag::online()),
            Arc::new(NoopMetrics),
        )
        .await
    }

    /// Stop the maintenance task. Cache operations keep working.
    pub fn dispose(&self) {
        if !self.inner.disposed.swap(true, Ordering::SeqCst) {
            // No receiver when the sweep is disabled
            let _ = self.inner.shutdown_tx.send(true);
            tracing::info!("Cache service disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Read `key` according to `policy` (default: the configured policy).
    ///
    /// `network_fetch` is invoked at most once, and only if the policy and
    /// connectivity call for a network read; concurrent reads of the same key
    /// share one invocation. `ttl` overrides the staleness threshold of the
    /// cached entry and becomes the TTL of a freshly fetched one.
    pub async fn fetch<T, F, Fut, E>(
        &self,
        key: &str,
        partition: &str,
        network_fetch: F,
        ttl: Option<Duration>,
        policy: Option<CachePolicy>,
    ) -> CacheResult<T>
    where
        T: Cacheable,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>> + Send + 'static,
    {
        let inner = &self.inner;
        let policy = policy.unwrap_or(inner.config.default_policy);

        if let Some((value, metadata)) = inner.memory_hit::<T>(key, partition) {
            inner.metrics.record_hit(key);
            tracing::debug!(key, partition, %policy, "Served from memory");
            return CacheResult::fresh(value, metadata);
        }

        let mut cached = None;
        let mut read_error = None;
        if policy.reads_persistent() {
            match inner.read_persistent::<T>(key, partition).await {
                Ok(found) => cached = found,
                Err(e) => {
                    tracing::warn!(key, partition, error = %e, "Persistent read failed");
                    read_error = Some(e);
                }
            }
        }

        let lookup = match &cached {
            Some((_, metadata)) => {
                let staleness_ttl = ttl.unwrap_or_else(|| metadata.ttl(inner.config.default_ttl));
                CacheLookup::Persistent {
                    stale: metadata.is_stale(staleness_ttl),
                }
            }
            None => CacheLookup::Absent,
        };

        let online = inner.connectivity.is_connected().await;
        let plan = plan_read(policy, lookup, online);
        tracing::debug!(key, partition, %policy, ?lookup, online, ?plan, "Read planned");

        match (plan, cached) {
            (ReadPlan::ServeCached { stale }, Some((value, metadata))) => {
                inner.metrics.record_hit(key);
                if stale {
                    CacheResult::stale(value, metadata, None)
                } else {
                    CacheResult::fresh(value, metadata)
                }
            }

            (ReadPlan::ServeStaleAndRefresh, Some((value, metadata))) => {
                inner.metrics.record_hit(key);
                self.spawn_refresh(key, partition, network_fetch, ttl);
                CacheResult::stale(value, metadata, None)
            }

            (ReadPlan::FetchNetwork { fallback_stale }, cached) => {
                inner.metrics.record_miss(key);
                match self
                    .fetch_and_store(key, partition, network_fetch, ttl, DataSource::Network)
                    .await
                {
                    Ok((value, metadata)) => CacheResult::fresh(value, metadata),
                    Err(e) => match cached {
                        Some((value, metadata)) if fallback_stale => {
                            tracing::warn!(key, error = %e, "Fetch failed, serving stale data");
                            CacheResult::stale(value, metadata, Some(e))
                        }
                        _ => {
                            tracing::warn!(key, error = %e, "Fetch failed with nothing cached");
                            CacheResult::error(e)
                        }
                    },
                }
            }

            _ => {
                inner.metrics.record_miss(key);
                match read_error {
                    Some(e) => CacheResult::error(e),
                    None => {
                        let reason = if policy == CachePolicy::CacheOnly {
                            "nothing cached and the policy forbids network reads"
                        } else {
                            "nothing cached and the device is offline"
                        };
                        CacheResult::missing(Some(FolioError::not_found(key, reason)))
                    }
                }
            }
        }
    }

    /// Read `key` from the cache tiers only. Expired data comes back `Stale`.
    pub async fn get_cached_data<T: Cacheable>(&self, key: &str, partition: &str) -> CacheResult<T> {
        let inner = &self.inner;

        if let Some((value, metadata)) = inner.memory_hit::<T>(key, partition) {
            inner.metrics.record_hit(key);
            return CacheResult::fresh(value, metadata);
        }

        match inner.read_persistent::<T>(key, partition).await {
            Ok(Some((value, metadata))) => {
                inner.metrics.record_hit(key);
                if metadata.is_expired(inner.config.default_ttl) {
                    CacheResult::stale(value, metadata, None)
                } else {
                    CacheResult::fresh(value, metadata)
                }
            }
            Ok(None) => {
                inner.metrics.record_miss(key);
                CacheResult::missing(Some(FolioError::not_found(key, "no cached entry")))
            }
            Err(e) => {
                inner.metrics.record_miss(key);
                tracing::warn!(key, partition, error = %e, "Persistent read failed");
                CacheResult::error(e)
            }
        }
    }

    /// Fetch through the coordinator and write the result through to both
    /// tiers. The write happens once per in-flight fetch, not per waiter.
    async fn fetch_and_store<T, F, Fut, E>(
        &self,
        key: &str,
        partition: &str,
        network_fetch: F,
        ttl: Option<Duration>,
        source: DataSource,
    ) -> FolioResult<(T, EntryMetadata)>
    where
        T: Cacheable,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>> + Send + 'static,
    {
        let service = Arc::downgrade(&self.inner);
        let owned_key = key.to_string();
        let owned_partition = partition.to_string();

        self.inner
            .coordinator
            .fetch_once(key, move || async move {
                let value = network_fetch()
                    .await
                    .map_err(|e| FolioError::network(owned_key.as_str(), e))?;

                let metadata = match service.upgrade() {
                    Some(inner) => {
                        inner
                            .store_fetched(&owned_key, value.clone(), &owned_partition, ttl, source)
                            .await
                    }
                    None => EntryMetadata::new(
                        owned_key.as_str(),
                        owned_partition.as_str(),
                        value.estimated_size(),
                        ttl,
                    )
                    .with_source(source),
                };

                Ok::<_, FolioError>((value, metadata))
            })
            .await
    }

    /// Revalidate in the background. Failures are logged and dropped.
    fn spawn_refresh<T, F, Fut, E>(
        &self,
        key: &str,
        partition: &str,
        network_fetch: F,
        ttl: Option<Duration>,
    ) where
        T: Cacheable,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>> + Send + 'static,
    {
        let service = self.clone();
        let key = key.to_string();
        let partition = partition.to_string();

        tokio::spawn(async move {
            match service
                .fetch_and_store::<T, _, _, _>(&key, &partition, network_fetch, ttl, DataSource::Refresh)
                .await
            {
                Ok(_) => tracing::debug!(key = %key, partition = %partition, "Background refresh stored"),
                Err(e) => {
                    tracing::warn!(key = %key, partition = %partition, error = %e, "Background refresh failed")
                }
            }
        });
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Write `data` to both tiers and return its metadata.
    pub async fn cache_data<T: Cacheable>(
        &self,
        key: &str,
        data: T,
        partition: &str,
        options: WriteOptions,
    ) -> FolioResult<EntryMetadata> {
        self.inner.cache_value(key, data, partition, options).await
    }

    /// Remove `key` from `partition` in both tiers.
    pub async fn remove(&self, key: &str, partition: &str) -> FolioResult<()> {
        self.inner.remove(key, partition).await
    }

    /// Remove every entry of a partition. Returns the number of entries dropped.
    pub async fn clear_partition(&self, partition: &str) -> FolioResult<usize> {
        let inner = &self.inner;
        PersistentStore::ensure_content_partition(partition)?;

        inner.memory.remove_where(|meta| meta.box_name == partition);
        let dropped = inner.persistent.clear_partition(partition).await?;
        inner.metrics.record_box_purge(partition);
        Ok(dropped.len())
    }

    /// Remove every entry and every queued pin operation. Document priorities
    /// are kept.
    pub async fn clear_all(&self) -> FolioResult<()> {
        let inner = &self.inner;
        inner.memory.clear();
        for partition in inner.persistent.clear_all().await? {
            inner.metrics.record_box_purge(&partition);
        }
        Ok(())
    }

    // ========================================================================
    // PINNING
    // ========================================================================

    /// Exempt an entry from automatic eviction. Best-effort: returns `false`
    /// if nothing was pinned or queued.
    pub async fn pin_item(&self, key: &str, partition: &str) -> bool {
        self.inner.set_pin(key, partition, PinOperation::Pin).await
    }

    /// Undo [`pin_item`](Self::pin_item). Best-effort.
    pub async fn unpin_item(&self, key: &str, partition: &str) -> bool {
        self.inner.set_pin(key, partition, PinOperation::Unpin).await
    }

    pub async fn is_pinned(&self, key: &str) -> bool {
        self.inner.is_pinned(key).await
    }

    /// Apply the newest queued pin operation of every key and drain the queue.
    ///
    /// Does nothing while offline. Returns the number of operations applied.
    pub async fn reconcile_pending_pins(&self) -> FolioResult<usize> {
        self.inner.reconcile_pending_pins().await
    }

    pub async fn pending_pin_operations(&self) -> FolioResult<Vec<PendingPinOperation>> {
        self.inner.pin_queue.all().await
    }

    // ========================================================================
    // PRIORITIES
    // ========================================================================

    pub async fn update_priority(
        &self,
        document_id: &str,
        level: PriorityLevel,
    ) -> FolioResult<BookPriority> {
        self.inner.priorities.update_priority(document_id, level).await
    }

    /// Record that a document was opened or otherwise used.
    pub async fn record_document_access(&self, document_id: &str) -> FolioResult<BookPriority> {
        self.inner.priorities.record_access(document_id).await
    }

    pub fn priority_of(&self, document_id: &str) -> Option<BookPriority> {
        self.inner.priorities.priority_of(document_id)
    }

    // ========================================================================
    // CONSUMERS
    // ========================================================================

    /// Associate a memory-resident entry with a consumer (e.g. a screen).
    pub fn associate_consumer(&self, key: &str, consumer: &str) -> bool {
        self.inner.memory.associate(key, consumer)
    }

    /// Drop a consumer's associations. The entries stay cached.
    pub fn release_consumer(&self, consumer: &str) -> usize {
        self.inner.memory.release_consumer(consumer)
    }

    // ========================================================================
    // INTROSPECTION
    // ========================================================================

    pub fn memory_cache_size_bytes(&self) -> u64 {
        self.inner.memory.size_bytes()
    }

    pub async fn persistent_cache_size_bytes(&self) -> FolioResult<u64> {
        self.inner.persistent.total_size().await
    }

    pub async fn total_size_bytes(&self) -> FolioResult<u64> {
        Ok(self.memory_cache_size_bytes() + self.persistent_cache_size_bytes().await?)
    }

    pub fn memory_entry_count(&self) -> usize {
        self.inner.memory.len()
    }

    pub fn in_flight_fetches(&self) -> usize {
        self.inner.coordinator.in_flight_count()
    }
}

// ============================================================================
// INTERNALS
// ============================================================================

impl ServiceInner {
    fn memory_hit<T: Cacheable>(&self, key: &str, partition: &str) -> Option<(T, EntryMetadata)> {
        self.memory
            .get::<T>(key)
            .filter(|(_, metadata)| metadata.box_name == partition)
    }

    fn record_memory_evictions(&self, keys: Vec<String>) {
        for key in keys {
            self.metrics
                .record_eviction(&key, EvictionReason::MemoryPressure);
        }
    }

    /// Read and decode a persistent entry, recording the access.
    ///
    /// Unexpired values are promoted into the memory tier. Runs under the
    /// key's lock so the touched copy never overwrites a concurrent pin or
    /// write.
    async fn read_persistent<T: Cacheable>(
        &self,
        key: &str,
        partition: &str,
    ) -> FolioResult<Option<(T, EntryMetadata)>> {
        let _guard = self.key_locks.lock(key).await;

        let Some(mut metadata) = self.persistent.read_metadata(key).await? else {
            return Ok(None);
        };
        if metadata.box_name != partition {
            return Ok(None);
        }

        let Some(bytes) = self.persistent.get_bytes(key, partition).await? else {
            tracing::debug!(key, partition, "Metadata without content");
            return Ok(None);
        };

        let value = T::decode(&bytes).map_err(|e| FolioError::type_conversion::<T>(key, e.reason))?;

        metadata.touch();
        if let Err(e) = self.persistent.write_metadata(&metadata).await {
            tracing::warn!(key, error = %e, "Failed to persist access metadata");
        }

        if !metadata.is_expired(self.config.default_ttl) {
            let evicted = self.memory.put(key, value.clone(), metadata.clone());
            self.record_memory_evictions(evicted);
        }

        Ok(Some((value, metadata)))
    }

    async fn cache_value<T: Cacheable>(
        &self,
        key: &str,
        value: T,
        partition: &str,
        options: WriteOptions,
    ) -> FolioResult<EntryMetadata> {
        PersistentStore::ensure_content_partition(partition)?;

        let bytes = value
            .encode()
            .map_err(|e| FolioError::type_conversion::<T>(key, e.reason))?;
        let size = value.estimated_size();

        let metadata = {
            let _guard = self.key_locks.lock(key).await;
            self.write_entry(key, value, partition, options, &bytes, size)
                .await?
        };

        self.enforce_persistent_budget().await;
        Ok(metadata)
    }

    /// Merge with the previous metadata and write both tiers. Caller holds
    /// the key's lock.
    async fn write_entry<T: Cacheable>(
        &self,
        key: &str,
        value: T,
        partition: &str,
        options: WriteOptions,
        bytes: &[u8],
        size: u64,
    ) -> FolioResult<EntryMetadata> {
        let previous = match self.persistent.read_metadata(key).await {
            Ok(previous) => previous.or_else(|| self.memory.metadata(key)),
            Err(e) => {
                tracing::warn!(key, error = %e, "Ignoring unreadable previous metadata");
                self.memory.metadata(key)
            }
        };

        let mut metadata =
            EntryMetadata::new(key, partition, size, options.ttl).with_source(options.source);
        metadata.e_tag = options.e_tag;
        metadata.version = options.version;
        metadata.document_id = options.document_id;

        if let Some(previous) = previous {
            metadata.access_count = previous.access_count.saturating_add(1);
            metadata.is_pinned = previous.is_pinned;
            if metadata.document_id.is_none() {
                metadata.document_id = previous.document_id;
            }
            if previous.box_name != partition {
                self.persistent.delete_bytes(key, &previous.box_name).await?;
            }
        }
        if let Some(pinned) = options.pinned {
            metadata.is_pinned = pinned;
        }

        let evicted = self.memory.put(key, value, metadata.clone());
        self.record_memory_evictions(evicted);

        self.persistent.put_bytes(key, partition, bytes).await?;
        self.persistent.write_metadata(&metadata).await?;
        self.metrics.record_write(key);
        tracing::debug!(key, partition, bytes = size, "Cached value");
        Ok(metadata)
    }

    /// Write a fetched value through. A failed write is logged; the caller
    /// still gets the value.
    async fn store_fetched<T: Cacheable>(
        &self,
        key: &str,
        value: T,
        partition: &str,
        ttl: Option<Duration>,
        source: DataSource,
    ) -> EntryMetadata {
        let size = value.estimated_size();
        let options = WriteOptions {
            ttl,
            source,
            ..WriteOptions::default()
        };

        match self.cache_value(key, value, partition, options).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(key, partition, error = %e, "Failed to cache fetched value");
                EntryMetadata::new(key, partition, size, ttl).with_source(source)
            }
        }
    }

    /// Run priority eviction if the persistent tier is over its ceiling.
    async fn enforce_persistent_budget(&self) {
        // Another write is already evicting
        let Ok(_guard) = self.eviction_lock.try_lock() else {
            return;
        };

        let max = self.config.persistent_max_bytes;
        let total = match self.persistent.used_bytes().await {
            // Confirm with a scan before evicting anything
            Ok(counted) if counted > max => self.persistent.remeasure().await,
            other => other,
        };
        let total = match total {
            Ok(total) => total,
            Err(e) => {
                tracing::warn!(error = %e, "Could not measure persistent tier");
                return;
            }
        };
        if total <= max {
            return;
        }

        let bytes_to_free = total.saturating_sub(self.config.persistent_target_bytes());
        match self.priorities.evict_low_priority_items(bytes_to_free).await {
            Ok(report) => {
                for metadata in &report.evicted {
                    self.memory.remove(&metadata.original_key);
                    self.metrics
                        .record_eviction(&metadata.original_key, EvictionReason::LowPriority);
                }
                tracing::info!(
                    total_bytes = total,
                    evicted = report.evicted.len(),
                    bytes_freed = report.bytes_freed,
                    "Persistent tier over budget, evicted low-priority entries"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Priority eviction failed");
            }
        }
    }

    async fn remove(&self, key: &str, partition: &str) -> FolioResult<()> {
        let _guard = self.key_locks.lock(key).await;

        if self
            .memory
            .metadata(key)
            .is_some_and(|metadata| metadata.box_name == partition)
        {
            self.memory.remove(key);
        }

        self.persistent.delete_bytes(key, partition).await?;
        if let Some(metadata) = self.persistent.read_metadata(key).await? {
            if metadata.box_name == partition {
                self.persistent.delete_metadata(key).await?;
            }
        }

        if let Err(e) = self.pin_queue.remove_for_key(key).await {
            tracing::warn!(key, error = %e, "Failed to drop queued pin operations");
        }

        tracing::debug!(key, partition, "Removed entry");
        Ok(())
    }

    async fn set_pin(&self, key: &str, partition: &str, operation: PinOperation) -> bool {
        match self.try_set_pin(key, partition, operation).await {
            Ok(applied) => applied,
            Err(e) => {
                tracing::warn!(key, partition, ?operation, error = %e, "Pin operation failed");
                false
            }
        }
    }

    async fn try_set_pin(
        &self,
        key: &str,
        partition: &str,
        operation: PinOperation,
    ) -> FolioResult<bool> {
        if self.connectivity.is_connected().await {
            let discarded = self.pin_queue.remove_for_key(key).await?;
            if discarded > 0 {
                tracing::debug!(key, discarded, "Discarded queued pin operations superseded online");
            }
            return self.apply_pin(key, Some(partition), operation.pinned()).await;
        }

        // Offline: flip the flag now so the UI reflects the intent, replay later.
        let applied = self.apply_pin(key, Some(partition), operation.pinned()).await?;
        if !applied {
            tracing::debug!(key, partition, "Queued pin operation for an entry not cached yet");
        }
        self.pin_queue
            .enqueue(&PendingPinOperation::new(key, operation))
            .await?;
        Ok(true)
    }

    /// Set the pin flag in both tiers. `false` if the entry is not cached (in
    /// `partition`, when given).
    async fn apply_pin(&self, key: &str, partition: Option<&str>, pinned: bool) -> FolioResult<bool> {
        let _guard = self.key_locks.lock(key).await;

        let Some(mut metadata) = self.persistent.read_metadata(key).await? else {
            return Ok(false);
        };
        if partition.is_some_and(|p| p != metadata.box_name) {
            return Ok(false);
        }

        if metadata.is_pinned != pinned {
            metadata.is_pinned = pinned;
            self.persistent.write_metadata(&metadata).await?;
        }
        self.memory.set_pinned(key, pinned);
        Ok(true)
    }

    async fn is_pinned(&self, key: &str) -> bool {
        if let Some(metadata) = self.memory.metadata(key) {
            return metadata.is_pinned;
        }
        match self.persistent.read_metadata(key).await {
            Ok(metadata) => metadata.is_some_and(|m| m.is_pinned),
            Err(e) => {
                tracing::warn!(key, error = %e, "Could not read pin state");
                false
            }
        }
    }

    async fn reconcile_pending_pins(&self) -> FolioResult<usize> {
        if !self.connectivity.is_connected().await {
            return Ok(0);
        }

        let latest = self.pin_queue.latest_per_key().await?;
        if latest.is_empty() {
            return Ok(0);
        }

        let mut applied = 0;
        for (key, operation) in &latest {
            match self.apply_pin(key, None, operation.operation_type.pinned()).await {
                Ok(true) => applied += 1,
                Ok(false) => tracing::debug!(key = %key, "Pending pin operation for an evicted entry"),
                Err(e) => {
                    // Keep the operations so the next pass retries
                    tracing::warn!(key = %key, error = %e, "Failed to apply pending pin operation");
                    continue;
                }
            }
            self.pin_queue.remove_for_key(key).await?;
        }

        tracing::info!(keys = latest.len(), applied, "Reconciled pending pin operations");
        Ok(applied)
    }
}

#[async_trait]
impl Maintenance for ServiceInner {
    fn fill_ratio(&self) -> f64 {
        self.memory.fill_ratio()
    }

    async fn run_maintenance(&self) {
        let expired = self.memory.remove_expired();
        for key in &expired {
            self.metrics.record_eviction(key, EvictionReason::Expired);
        }
        if !expired.is_empty() {
            tracing::info!(removed = expired.len(), "Swept expired memory entries");
        }

        if let Err(e) = self.reconcile_pending_pins().await {
            tracing::error!(error = %e, "Pin reconciliation failed");
        }
    }
}
