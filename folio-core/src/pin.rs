//! Pin/unpin intents recorded while offline.

use crate::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Requested pin state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PinOperation {
    Pin,
    Unpin,
}

impl PinOperation {
    /// The `is_pinned` value this operation leads to.
    pub fn pinned(self) -> bool {
        matches!(self, Self::Pin)
    }
}

/// One queued pin/unpin intent.
///
/// Several operations may exist for one key; the most recent by timestamp is
/// authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPinOperation {
    /// UUIDv7, so ids sort by creation time.
    pub id: Uuid,
    pub item_key: String,
    pub operation_type: PinOperation,
    pub timestamp: Timestamp,
}

impl PendingPinOperation {
    pub fn new(item_key: impl Into<String>, operation_type: PinOperation) -> Self {
        Self::new_at(item_key, operation_type, Utc::now())
    }

    pub fn new_at(
        item_key: impl Into<String>,
        operation_type: PinOperation,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            item_key: item_key.into(),
            operation_type,
            timestamp,
        }
    }

    /// Whether `self` supersedes `other` (later timestamp, ties broken by id).
    pub fn is_newer_than(&self, other: &PendingPinOperation) -> bool {
        (self.timestamp, self.id) > (other.timestamp, other.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_state() {
        assert!(PinOperation::Pin.pinned());
        assert!(!PinOperation::Unpin.pinned());
    }

    #[test]
    fn test_newer_by_timestamp() {
        let now = Utc::now();
        let older = PendingPinOperation::new_at("k", PinOperation::Unpin, now);
        let newer = PendingPinOperation::new_at(
            "k",
            PinOperation::Pin,
            now + chrono::Duration::milliseconds(1),
        );
        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
    }

    #[test]
    fn test_same_timestamp_breaks_tie_by_id() {
        let now = Utc::now();
        let first = PendingPinOperation::new_at("k", PinOperation::Pin, now);
        let second = PendingPinOperation::new_at("k", PinOperation::Unpin, now);
        // UUIDv7 ids generated later compare greater.
        assert!(second.is_newer_than(&first));
    }
}
