//! Error types for folio cache operations

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// The error raised by a caller-supplied network fetch, shared so that one
/// failed fetch can be reported to every waiter.
pub type FetchFailure = Arc<dyn StdError + Send + Sync>;

/// Persistent store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Failed to open store at {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Partition {partition} unavailable: {reason}")]
    PartitionUnavailable { partition: String, reason: String },

    #[error("Corrupt record {key} in partition {partition}: {reason}")]
    CorruptRecord {
        partition: String,
        key: String,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("I/O error: {reason}")]
    Io { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Encoding or decoding a cached payload failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct CodecError {
    pub reason: String,
}

impl CodecError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Master error type for all folio errors.
#[derive(Debug, Clone, Error)]
pub enum FolioError {
    /// No cache entry exists and the policy did not permit (or connectivity
    /// did not allow) a network fetch.
    #[error("No cached entry for {key}: {reason}")]
    NotFound { key: String, reason: String },

    /// The supplied fetch closure failed.
    #[error("Network fetch for {key} failed: {cause}")]
    NetworkFetch { key: String, cause: FetchFailure },

    /// Stored bytes could not be decoded to the requested type.
    #[error("Could not decode {key} as {expected}: {reason}")]
    TypeConversion {
        key: String,
        expected: String,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl FolioError {
    pub fn not_found(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotFound {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Wrap the error of a failed fetch closure.
    pub fn network<E>(key: impl Into<String>, cause: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::NetworkFetch {
            key: key.into(),
            cause: Arc::from(cause.into()),
        }
    }

    /// A decode failure for the requested type `T`.
    pub fn type_conversion<T: ?Sized>(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TypeConversion {
            key: key.into(),
            expected: std::any::type_name::<T>().to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::NetworkFetch { .. })
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type alias for folio operations.
pub type FolioResult<T> = Result<T, FolioError>;

// =============================================================================
// TESTS
// =============================================================================
