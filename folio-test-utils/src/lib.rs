//! folio Test Utilities
//!
//! Shared test infrastructure for the folio workspace:
//! - Mock stores, metrics observers and network sources
//! - Proptest generators for the cache data types
//! - Fixtures for common scenarios
//! - Assertions over `CacheResult`

// Re-export the engine types tests reach for most
pub use folio_storage::{
    CacheMetrics, CacheService, CacheStats, ConnectivityFlag, EvictionReason, InMemoryStore,
    KeyValueStore, MetricsObserver, WriteOptions,
};

pub use folio_core::{
    BookPriority, CacheConfig, CacheKey, CachePolicy, CacheResult, Cacheable, DataSource,
    EntryMetadata, FolioError, FolioResult, PendingPinOperation, PinOperation, PriorityLevel,
    StorageError, SweepIntervals, Timestamp,
};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};

// ============================================================================
// MOCK STORE
// ============================================================================

/// In-memory store whose reads and writes can be made to fail on demand.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: InMemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> FolioResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Io {
                reason: format!("injected {} failure", op),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn put(&self, key: &str, partition: &str, bytes: &[u8]) -> FolioResult<()> {
        self.check(&self.fail_writes, "write")?;
        self.inner.put(key, partition, bytes).await
    }

    async fn get(&self, key: &str, partition: &str) -> FolioResult<Option<Vec<u8>>> {
        self.check(&self.fail_reads, "read")?;
        self.inner.get(key, partition).await
    }

    async fn delete(&self, key: &str, partition: &str) -> FolioResult<bool> {
        self.check(&self.fail_writes, "delete")?;
        self.inner.delete(key, partition).await
    }

    async fn keys(&self, partition: &str) -> FolioResult<Vec<String>> {
        self.check(&self.fail_reads, "scan")?;
        self.inner.keys(partition).await
    }

    async fn size_of(&self, partition: &str) -> FolioResult<u64> {
        self.check(&self.fail_reads, "size")?;
        self.inner.size_of(partition).await
    }

    async fn clear(&self, partition: &str) -> FolioResult<u64> {
        self.check(&self.fail_writes, "clear")?;
        self.inner.clear(partition).await
    }

    async fn partitions(&self) -> FolioResult<Vec<String>> {
        self.check(&self.fail_reads, "list")?;
        self.inner.partitions().await
    }
}

// ============================================================================
// MOCK METRICS
// ============================================================================

/// One event seen by [`RecordingMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricEvent {
    Hit(String),
    Miss(String),
    Write(String),
    Eviction(String, EvictionReason),
    BoxPurge(String),
}

/// Observer that keeps every event in order.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Keys evicted for `reason`, in order.
    pub fn evicted(&self, reason: EvictionReason) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                MetricEvent::Eviction(key, r) if r == reason => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn push(&self, event: MetricEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl MetricsObserver for RecordingMetrics {
    fn record_hit(&self, key: &str) {
        self.push(MetricEvent::Hit(key.to_string()));
    }

    fn record_miss(&self, key: &str) {
        self.push(MetricEvent::Miss(key.to_string()));
    }

    fn record_write(&self, key: &str) {
        self.push(MetricEvent::Write(key.to_string()));
    }

    fn record_eviction(&self, key: &str, reason: EvictionReason) {
        self.push(MetricEvent::Eviction(key.to_string(), reason));
    }

    fn record_box_purge(&self, partition: &str) {
        self.push(MetricEvent::BoxPurge(partition.to_string()));
    }
}

// ============================================================================
// MOCK NETWORK
// ============================================================================

/// Scripted remote data source that counts how often it is hit.
///
/// Each call to [`fetcher`](Self::fetcher) hands out a one-shot closure
/// suitable for `CacheService::fetch`.
pub struct MockNetwork<T> {
    state: Arc<NetworkState<T>>,
}

struct NetworkState<T> {
    response: Mutex<Result<T, String>>,
    latency: Mutex<Duration>,
    calls: AtomicUsize,
}

impl<T> Clone for MockNetwork<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> MockNetwork<T> {
    /// A source that answers with `value`.
    pub fn returning(value: T) -> Self {
        Self::with_response(Ok(value))
    }

    /// A source that fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self::with_response(Err(reason.into()))
    }

    fn with_response(response: Result<T, String>) -> Self {
        Self {
            state: Arc::new(NetworkState {
                response: Mutex::new(response),
                latency: Mutex::new(Duration::ZERO),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self
            .state
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = latency;
        self
    }

    pub fn respond_with(&self, value: T) {
        *self
            .state
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Ok(value);
    }

    pub fn fail_with(&self, reason: impl Into<String>) {
        *self
            .state
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Err(reason.into());
    }

    /// Number of fetches actually started.
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// A fetch closure bound to this source.
    pub fn fetcher(&self) -> impl FnOnce() -> BoxFuture<'static, Result<T, String>> + Send + 'static {
        let state = Arc::clone(&self.state);
        move || {
            async move {
                state.calls.fetch_add(1, Ordering::SeqCst);
                let latency = *state.latency.lock().unwrap_or_else(PoisonError::into_inner);
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                state
                    .response
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            }
            .boxed()
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for the cache data types.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;
    use std::collections::BTreeMap;

    pub fn arb_policy() -> impl Strategy<Value = CachePolicy> {
        prop_oneof![
            Just(CachePolicy::CacheOnly),
            Just(CachePolicy::NetworkOnly),
            Just(CachePolicy::CacheFirst),
            Just(CachePolicy::NetworkFirst),
            Just(CachePolicy::StaleWhileRevalidate),
        ]
    }

    pub fn arb_priority_level() -> impl Strategy<Value = PriorityLevel> {
        prop_oneof![
            Just(PriorityLevel::Low),
            Just(PriorityLevel::Normal),
            Just(PriorityLevel::High),
        ]
    }

    pub fn arb_data_source() -> impl Strategy<Value = DataSource> {
        prop_oneof![
            Just(DataSource::Local),
            Just(DataSource::Network),
            Just(DataSource::Refresh),
        ]
    }

    pub fn arb_pin_operation() -> impl Strategy<Value = PinOperation> {
        prop_oneof![Just(PinOperation::Pin), Just(PinOperation::Unpin)]
    }

    /// Timestamps between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    /// Keys shaped like `book_<id>`.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z]{2,8}_[0-9]{1,6}"
    }

    pub fn arb_partition() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("books".to_string()),
            Just("chapters".to_string()),
            Just("covers".to_string()),
        ]
    }

    /// Flat request parameter maps with scalar values.
    pub fn arb_params() -> impl Strategy<Value = BTreeMap<String, Value>> {
        let scalar = prop_oneof![
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z0-9 ]{0,12}".prop_map(Value::from),
        ];
        prop::collection::btree_map("[a-z]{1,8}", scalar, 0..6)
    }

    pub fn arb_entry_metadata() -> impl Strategy<Value = EntryMetadata> {
        (
            arb_key(),
            arb_partition(),
            arb_timestamp(),
            0u64..1_000_000,
            proptest::option::of(1u64..86_400_000),
            any::<bool>(),
            arb_data_source(),
            proptest::option::of("doc_[0-9]{1,3}"),
        )
            .prop_map(|(key, partition, now, size, ttl_ms, pinned, source, document)| {
                let mut metadata =
                    EntryMetadata::new_at(key, partition, size, ttl_ms.map(Duration::from_millis), now)
                        .with_source(source)
                        .with_pinned(pinned);
                metadata.document_id = document;
                metadata
            })
    }

    pub fn arb_pending_pin_operation() -> impl Strategy<Value = PendingPinOperation> {
        (arb_key(), arb_pin_operation(), arb_timestamp())
            .prop_map(|(key, op, at)| PendingPinOperation::new_at(key, op, at))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use serde::{Deserialize, Serialize};

    /// A typical cached payload.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Book {
        pub id: u64,
        pub title: String,
        pub author: String,
        pub pages: u32,
    }

    impl Cacheable for Book {}

    pub fn sample_book() -> Book {
        book(42, "The Left Hand of Darkness")
    }

    pub fn book(id: u64, title: &str) -> Book {
        Book {
            id,
            title: title.to_string(),
            author: "Ursula K. Le Guin".to_string(),
            pages: 304,
        }
    }

    /// Default configuration with the maintenance task disabled, so tests
    /// control when sweeps happen.
    pub fn test_config() -> CacheConfig {
        CacheConfig::default().with_sweep(false)
    }

    /// A config with a tiny memory tier (`max_bytes`, default 70% target).
    pub fn tiny_memory_config(max_bytes: u64) -> CacheConfig {
        test_config().with_memory_max_bytes(max_bytes)
    }

    /// Sweep intervals short enough to observe in a test.
    pub fn fast_sweep() -> SweepIntervals {
        SweepIntervals {
            relaxed: Duration::from_millis(20),
            moderate: Duration::from_millis(20),
            aggressive: Duration::from_millis(20),
        }
    }

    /// A binary payload of exactly `size` accounted bytes.
    pub fn blob(size: usize) -> Vec<u8> {
        vec![0xAB; size]
    }

    /// Service over an in-memory store, with recording metrics and a
    /// connectivity flag the test can flip.
    pub async fn service(
        config: CacheConfig,
    ) -> FolioResult<(CacheService, Arc<ConnectivityFlag>, Arc<RecordingMetrics>)> {
        service_over(config, Arc::new(InMemoryStore::new())).await
    }

    pub async fn service_over(
        config: CacheConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> FolioResult<(CacheService, Arc<ConnectivityFlag>, Arc<RecordingMetrics>)> {
        let connectivity = Arc::new(ConnectivityFlag::online());
        let metrics = Arc::new(RecordingMetrics::new());
        let cache = CacheService::init(config, store, connectivity.clone(), metrics.clone()).await?;
        Ok((cache, connectivity, metrics))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over cache read results.

    use super::*;
    use std::fmt::Debug;

    #[track_caller]
    pub fn assert_fresh<T: Debug + PartialEq>(result: &CacheResult<T>, expected: &T) {
        match result {
            CacheResult::Fresh { value, .. } => assert_eq!(value, expected),
            other => panic!("Expected Fresh, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_stale<T: Debug + PartialEq>(result: &CacheResult<T>, expected: &T) {
        match result {
            CacheResult::Stale { value, .. } => assert_eq!(value, expected),
            other => panic!("Expected Stale, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_missing<T: Debug>(result: &CacheResult<T>) {
        assert!(result.is_missing(), "Expected Missing, got: {:?}", result);
    }

    #[track_caller]
    pub fn assert_error<T: Debug>(result: &CacheResult<T>) {
        assert!(result.is_error(), "Expected Error, got: {:?}", result);
    }

    /// Assert the result carries a network fetch error.
    #[track_caller]
    pub fn assert_network_error<T: Debug>(result: &CacheResult<T>) {
        match result.error_ref() {
            Some(error) if error.is_network() => {}
            _ => panic!("Expected a network error, got: {:?}", result),
        }
    }

    #[track_caller]
    pub fn assert_storage_error<T: Debug>(result: &FolioResult<T>) {
        match result {
            Err(FolioError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
