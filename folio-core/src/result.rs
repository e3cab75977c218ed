//! Uniform result of every cache read.

use crate::entry::EntryMetadata;
use crate::error::FolioError;

/// Outcome of a cache read.
///
/// Read paths never surface a raw error when usable data exists: a failed
/// refresh over cached data comes back as `Stale` with the error attached.
#[derive(Debug, Clone)]
pub enum CacheResult<T> {
    /// Value within its TTL (or just fetched).
    Fresh { value: T, metadata: EntryMetadata },
    /// Value past its TTL. `error` explains why it was not refreshed, if a
    /// refresh was attempted and failed.
    Stale {
        value: T,
        metadata: EntryMetadata,
        error: Option<FolioError>,
    },
    /// Nothing cached and nothing fetched.
    Missing { error: Option<FolioError> },
    /// Nothing cached and the fetch or read failed.
    Error { error: FolioError },
}

impl<T> CacheResult<T> {
    pub fn fresh(value: T, metadata: EntryMetadata) -> Self {
        Self::Fresh { value, metadata }
    }

    pub fn stale(value: T, metadata: EntryMetadata, error: Option<FolioError>) -> Self {
        Self::Stale {
            value,
            metadata,
            error,
        }
    }

    pub fn missing(error: Option<FolioError>) -> Self {
        Self::Missing { error }
    }

    pub fn error(error: FolioError) -> Self {
        Self::Error { error }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh { .. })
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// True for `Fresh` and `Stale`.
    pub fn has_value(&self) -> bool {
        self.value().is_some()
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Fresh { value, .. } | Self::Stale { value, .. } => Some(value),
            Self::Missing { .. } | Self::Error { .. } => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Fresh { value, .. } | Self::Stale { value, .. } => Some(value),
            Self::Missing { .. } | Self::Error { .. } => None,
        }
    }

    pub fn metadata(&self) -> Option<&EntryMetadata> {
        match self {
            Self::Fresh { metadata, .. } | Self::Stale { metadata, .. } => Some(metadata),
            Self::Missing { .. } | Self::Error { .. } => None,
        }
    }

    /// The attached error, if any.
    pub fn error_ref(&self) -> Option<&FolioError> {
        match self {
            Self::Fresh { .. } => None,
            Self::Stale { error, .. } | Self::Missing { error } => error.as_ref(),
            Self::Error { error } => Some(error),
        }
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheResult<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Fresh { value, metadata } => CacheResult::Fresh {
                value: f(value),
                metadata,
            },
            Self::Stale {
                value,
                metadata,
                error,
            } => CacheResult::Stale {
                value: f(value),
                metadata,
                error,
            },
            Self::Missing { error } => CacheResult::Missing { error },
            Self::Error { error } => CacheResult::Error { error },
        }
    }
}
