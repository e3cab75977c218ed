//! folio Storage - Multi-tier cache engine
//!
//! Reads flow memory tier → persistent tier → network, with the read policy
//! deciding at each step whether cached data is good enough. Writes go to
//! both tiers. Concurrent fetches for one key share a single in-flight
//! request.
//!
//! # Layers
//!
//! - [`store`]: the key-value capability the persistent tier is built on,
//!   with an in-memory implementation
//! - [`lmdb`]: LMDB implementation of the capability (one named database per
//!   partition)
//! - [`persistent`]: partition-aware adapter that also owns the metadata,
//!   priority and pin-queue partitions
//! - [`memory`]: size-accounted LRU of live values
//! - [`coordinator`]: single-flight registry for network fetches
//! - [`policy`]: pure read planning per [`CachePolicy`](folio_core::CachePolicy)
//! - [`eviction`]: document-priority eviction of the persistent tier
//! - [`pin_queue`]: durable log of pin/unpin intents made while offline
//! - [`service`]: [`CacheService`], the public entry point

pub mod connectivity;
pub mod coordinator;
pub mod eviction;
pub mod lmdb;
pub mod memory;
pub mod metrics;
pub mod persistent;
pub mod pin_queue;
pub mod policy;
pub mod service;
pub mod store;
mod sweep;
mod sync;

pub use connectivity::{ConnectivityFlag, ConnectivityOracle};
pub use coordinator::FetchCoordinator;
pub use eviction::{select_candidates, EvictionReport, PriorityEvictionManager};
pub use lmdb::{LmdbStore, LmdbStoreConfig, LmdbStoreError};
pub use memory::MemoryCache;
pub use metrics::{CacheMetrics, CacheStats, EvictionReason, MetricsObserver, NoopMetrics};
pub use persistent::{
    PersistentStore, METADATA_PARTITION, PIN_QUEUE_PARTITION, PRIORITY_PARTITION,
};
pub use pin_queue::OfflinePinQueue;
pub use policy::{plan_read, CacheLookup, ReadPlan};
pub use service::{CacheService, WriteOptions};
pub use store::{InMemoryStore, KeyValueStore};
