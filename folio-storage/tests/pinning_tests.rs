//! Pinning, offline pin queueing and reconciliation.

use std::time::Duration;

use folio_test_utils::fixtures::{self, sample_book};
use folio_test_utils::*;

async fn cached_service() -> (CacheService, std::sync::Arc<ConnectivityFlag>) {
    let (cache, connectivity, _) = fixtures::service(fixtures::test_config())
        .await
        .expect("service should start");
    cache
        .cache_data("book_42", sample_book(), "books", WriteOptions::new())
        .await
        .expect("write should succeed");
    (cache, connectivity)
}

#[tokio::test]
async fn online_pin_and_unpin_apply_immediately() {
    let (cache, _) = cached_service().await;

    assert!(cache.pin_item("book_42", "books").await);
    assert!(cache.is_pinned("book_42").await);

    assert!(cache.unpin_item("book_42", "books").await);
    assert!(!cache.is_pinned("book_42").await);

    let queued = cache
        .pending_pin_operations()
        .await
        .expect("queue should be readable");
    assert!(queued.is_empty());
}

#[tokio::test]
async fn pin_in_wrong_partition_is_rejected() {
    let (cache, _) = cached_service().await;

    assert!(!cache.pin_item("book_42", "chapters").await);
    assert!(!cache.is_pinned("book_42").await);
}

#[tokio::test]
async fn offline_pin_then_unpin_resolves_to_unpin() {
    let (cache, connectivity) = cached_service().await;
    connectivity.set_online(false);

    assert!(cache.pin_item("book_42", "books").await);
    // Optimistic local state while offline
    assert!(cache.is_pinned("book_42").await);

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(cache.unpin_item("book_42", "books").await);

    let queued = cache
        .pending_pin_operations()
        .await
        .expect("queue should be readable");
    assert_eq!(queued.len(), 2);

    // Nothing is replayed while offline
    assert_eq!(
        cache
            .reconcile_pending_pins()
            .await
            .expect("reconcile should succeed"),
        0
    );

    connectivity.set_online(true);
    assert_eq!(
        cache
            .reconcile_pending_pins()
            .await
            .expect("reconcile should succeed"),
        1
    );
    assert!(!cache.is_pinned("book_42").await);
    assert!(cache
        .pending_pin_operations()
        .await
        .expect("queue should be readable")
        .is_empty());
}

#[tokio::test]
async fn online_pin_discards_queued_unpin() {
    let (cache, connectivity) = cached_service().await;

    assert!(cache.pin_item("book_42", "books").await);
    connectivity.set_online(false);
    assert!(cache.unpin_item("book_42", "books").await);

    connectivity.set_online(true);
    assert!(cache.pin_item("book_42", "books").await);
    assert!(cache
        .pending_pin_operations()
        .await
        .expect("queue should be readable")
        .is_empty());

    assert_eq!(
        cache
            .reconcile_pending_pins()
            .await
            .expect("reconcile should succeed"),
        0
    );
    assert!(cache.is_pinned("book_42").await);
}

#[tokio::test]
async fn offline_pin_of_uncached_entry_is_queued() {
    let (cache, connectivity, _) = fixtures::service(fixtures::test_config())
        .await
        .expect("service should start");
    connectivity.set_online(false);

    assert!(cache.pin_item("book_7", "books").await);
    assert!(!cache.is_pinned("book_7").await);

    // The entry arrives later, then connectivity returns
    cache
        .cache_data("book_7", sample_book(), "books", WriteOptions::new())
        .await
        .expect("write should succeed");
    connectivity.set_online(true);

    assert_eq!(
        cache
            .reconcile_pending_pins()
            .await
            .expect("reconcile should succeed"),
        1
    );
    assert!(cache.is_pinned("book_7").await);
}

#[tokio::test]
async fn remove_drops_queued_operations() {
    let (cache, connectivity) = cached_service().await;
    connectivity.set_online(false);
    assert!(cache.pin_item("book_42", "books").await);

    cache
        .remove("book_42", "books")
        .await
        .expect("remove should succeed");

    assert!(!cache.is_pinned("book_42").await);
    assert!(cache
        .pending_pin_operations()
        .await
        .expect("queue should be readable")
        .is_empty());
}

#[tokio::test]
async fn pin_state_survives_overwrite() {
    let (cache, _) = cached_service().await;
    assert!(cache.pin_item("book_42", "books").await);

    let metadata = cache
        .cache_data("book_42", sample_book(), "books", WriteOptions::new())
        .await
        .expect("write should succeed");
    assert!(metadata.is_pinned);

    let metadata = cache
        .cache_data(
            "book_42",
            sample_book(),
            "books",
            WriteOptions::new().with_pinned(false),
        )
        .await
        .expect("write should succeed");
    assert!(!metadata.is_pinned);
}
