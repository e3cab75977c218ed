//! Per-document priority records.

use crate::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Importance of a logical document. Lower levels are evicted first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum PriorityLevel {
    Low,
    #[default]
    Normal,
    High,
}

/// Priority and access history of one book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookPriority {
    pub book_id: String,
    pub level: PriorityLevel,
    pub last_access_timestamp: Timestamp,
    pub access_count: u64,
}

impl BookPriority {
    pub fn new(book_id: impl Into<String>, level: PriorityLevel) -> Self {
        Self::new_at(book_id, level, Utc::now())
    }

    pub fn new_at(book_id: impl Into<String>, level: PriorityLevel, now: Timestamp) -> Self {
        Self {
            book_id: book_id.into(),
            level,
            last_access_timestamp: now,
            access_count: 0,
        }
    }

    /// Record an access that signals importance, such as opening the book.
    pub fn touch_at(&mut self, now: Timestamp) {
        if now > self.last_access_timestamp {
            self.last_access_timestamp = now;
        }
        self.access_count = self.access_count.saturating_add(1);
    }

    pub fn touch(&mut self) {
        self.touch_at(Utc::now());
    }
}
