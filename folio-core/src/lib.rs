//! folio Core - Cache Data Types
//!
//! Pure data structures shared by every folio crate: cache keys, entry
//! metadata, read results, policies, document priorities, queued pin
//! operations, configuration and the error taxonomy.
//! This crate contains no I/O - the engine lives in folio-storage.

pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod pin;
pub mod policy;
pub mod priority;
pub mod result;
pub mod size;

use chrono::{DateTime, Utc};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use codec::Cacheable;
pub use config::{CacheConfig, SweepIntervals};
pub use entry::{DataSource, EntryMetadata};
pub use error::{CodecError, ConfigError, FetchFailure, FolioError, FolioResult, StorageError};
pub use key::CacheKey;
pub use pin::{PendingPinOperation, PinOperation};
pub use policy::CachePolicy;
pub use priority::{BookPriority, PriorityLevel};
pub use result::CacheResult;
pub use size::{estimate_blob_size, estimate_size, estimate_str_size};
