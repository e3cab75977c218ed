//! Per-entry cache metadata.
//!
//! One `EntryMetadata` record exists for every cached item. It is kept next
//! to the value in the memory tier and persisted as JSON in the metadata
//! partition so that staleness, pinning and eviction decisions survive a
//! restart.

use crate::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the cached value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataSource {
    /// Written explicitly by the application.
    #[default]
    Local,
    /// Fetched synchronously from the remote data source.
    Network,
    /// Written by a background revalidation.
    Refresh,
}

/// Metadata describing one cached item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub original_key: String,
    /// Persistent partition holding the value bytes.
    pub box_name: String,
    pub created_at: Timestamp,
    pub last_access_at: Timestamp,
    pub access_count: u64,
    /// Absent means the configured default TTL applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_millis: Option<u64>,
    pub size_bytes: u64,
    pub is_pinned: bool,
    #[serde(default)]
    pub source: DataSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Logical document (e.g. a book) this entry belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl EntryMetadata {
    /// Metadata for a freshly written entry. The write counts as the first access.
    pub fn new(
        original_key: impl Into<String>,
        box_name: impl Into<String>,
        size_bytes: u64,
        ttl: Option<Duration>,
    ) -> Self {
        Self::new_at(original_key, box_name, size_bytes, ttl, Utc::now())
    }

    pub fn new_at(
        original_key: impl Into<String>,
        box_name: impl Into<String>,
        size_bytes: u64,
        ttl: Option<Duration>,
        now: Timestamp,
    ) -> Self {
        Self {
            original_key: original_key.into(),
            box_name: box_name.into(),
            created_at: now,
            last_access_at: now,
            access_count: 1,
            ttl_millis: ttl.map(duration_to_millis),
            size_bytes,
            is_pinned: false,
            source: DataSource::Local,
            e_tag: None,
            version: None,
            document_id: None,
        }
    }

    pub fn with_source(mut self, source: DataSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_pinned(mut self, pinned: bool) -> Self {
        self.is_pinned = pinned;
        self
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// The TTL in force for this entry.
    pub fn ttl(&self, default_ttl: Duration) -> Duration {
        self.ttl_millis
            .map(Duration::from_millis)
            .unwrap_or(default_ttl)
    }

    /// Time elapsed since the entry was written.
    pub fn age_at(&self, now: Timestamp) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// `now - created_at > ttl`
    pub fn is_expired_at(&self, now: Timestamp, default_ttl: Duration) -> bool {
        self.age_at(now) > self.ttl(default_ttl)
    }

    pub fn is_expired(&self, default_ttl: Duration) -> bool {
        self.is_expired_at(Utc::now(), default_ttl)
    }

    /// `now - created_at > custom_ttl`, independent of the entry's own TTL.
    pub fn is_stale_at(&self, now: Timestamp, custom_ttl: Duration) -> bool {
        self.age_at(now) > custom_ttl
    }

    pub fn is_stale(&self, custom_ttl: Duration) -> bool {
        self.is_stale_at(Utc::now(), custom_ttl)
    }

    /// Record an access.
    pub fn touch_at(&mut self, now: Timestamp) {
        if now > self.last_access_at {
            self.last_access_at = now;
        }
        self.access_count = self.access_count.saturating_add(1);
    }

    pub fn touch(&mut self) {
        self.touch_at(Utc::now());
    }
}

/// Millisecond count of a duration, saturating at `u64::MAX`.
pub fn duration_to_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_new_counts_write_as_access() {
        let meta = EntryMetadata::new("book_42", "books", 128, Some(HOUR));
        assert_eq!(meta.access_count, 1);
        assert_eq!(meta.ttl_millis, Some(3_600_000));
        assert_eq!(meta.created_at, meta.last_access_at);
        assert!(!meta.is_pinned);
        assert_eq!(meta.source, DataSource::Local);
    }

    #[test]
    fn test_absent_ttl_uses_default() {
        let meta = EntryMetadata::new("k", "b", 1, None);
        assert_eq!(meta.ttl(Duration::from_secs(60)), Duration::from_secs(60));

        let meta = EntryMetadata::new("k", "b", 1, Some(Duration::from_secs(5)));
        assert_eq!(meta.ttl(Duration::from_secs(60)), Duration::from_secs(5));
    }

    #[test]
    fn test_expiry_boundary() {
        let created = Utc::now();
        let meta = EntryMetadata::new_at("k", "b", 1, Some(Duration::from_secs(10)), created);

        let before = created + chrono::Duration::seconds(9);
        let exact = created + chrono::Duration::seconds(10);
        let after = created + chrono::Duration::seconds(11);

        assert!(!meta.is_expired_at(before, HOUR));
        // Strictly greater than the TTL is required.
        assert!(!meta.is_expired_at(exact, HOUR));
        assert!(meta.is_expired_at(after, HOUR));
    }

    #[test]
    fn test_stale_uses_custom_ttl() {
        let created = Utc::now();
        let meta = EntryMetadata::new_at("k", "b", 1, Some(HOUR), created);
        let later = created + chrono::Duration::seconds(120);

        assert!(meta.is_stale_at(later, Duration::from_secs(60)));
        assert!(!meta.is_stale_at(later, Duration::from_secs(300)));
        assert!(!meta.is_expired_at(later, HOUR));
    }

    #[test]
    fn test_clock_skew_is_not_negative_age() {
        let created = Utc::now();
        let meta = EntryMetadata::new_at("k", "b", 1, None, created);
        let earlier = created - chrono::Duration::seconds(30);
        assert_eq!(meta.age_at(earlier), Duration::ZERO);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let created = Utc::now();
        let mut meta = EntryMetadata::new_at("k", "b", 1, None, created);
        let later = created + chrono::Duration::seconds(5);

        meta.touch_at(later);
        assert_eq!(meta.access_count, 2);
        assert_eq!(meta.last_access_at, later);

        // An out-of-order timestamp never moves last access backwards.
        meta.touch_at(created);
        assert_eq!(meta.access_count, 3);
        assert_eq!(meta.last_access_at, later);
    }

    #[test]
    fn test_json_shape_is_camel_case() {
        let meta = EntryMetadata::new("book_42", "books", 64, None)
            .with_pinned(true)
            .with_document("42");
        let json = serde_json::to_value(&meta).expect("serialize should succeed");

        assert_eq!(json["originalKey"], "book_42");
        assert_eq!(json["boxName"], "books");
        assert_eq!(json["isPinned"], true);
        assert_eq!(json["documentId"], "42");
        assert!(json.get("ttlMillis").is_none());

        let back: EntryMetadata = serde_json::from_value(json).expect("deserialize should succeed");
        assert_eq!(back, meta);
    }
}
