//! Concurrent fetches for one key share a single network request.

use std::time::Duration;

use futures_util::future::join_all;

use folio_test_utils::assertions::*;
use folio_test_utils::fixtures::{self, sample_book, Book};
use folio_test_utils::*;

const CALLERS: usize = 16;

#[tokio::test]
async fn concurrent_misses_fetch_once() {
    let (cache, _, _) = fixtures::service(fixtures::test_config())
        .await
        .expect("service should start");
    let network = MockNetwork::returning(sample_book()).with_latency(Duration::from_millis(50));

    let reads = (0..CALLERS).map(|_| {
        cache.fetch::<Book, _, _, _>("book_42", "books", network.fetcher(), None, None)
    });
    let results = join_all(reads).await;

    assert_eq!(network.calls(), 1);
    for result in &results {
        assert_fresh(result, &sample_book());
    }
    assert_eq!(cache.in_flight_fetches(), 0);
}

#[tokio::test]
async fn concurrent_failures_share_one_error() {
    let (cache, _, _) = fixtures::service(fixtures::test_config())
        .await
        .expect("service should start");
    let network =
        MockNetwork::<Book>::failing("502 bad gateway").with_latency(Duration::from_millis(50));

    let reads = (0..CALLERS)
        .map(|_| cache.fetch("book_42", "books", network.fetcher(), None, None));
    let results = join_all(reads).await;

    assert_eq!(network.calls(), 1);
    for result in &results {
        assert_error(result);
        assert_network_error(result);
    }

    // The failed flight is gone, so the next read tries again
    network.respond_with(sample_book());
    let retry = cache
        .fetch("book_42", "books", network.fetcher(), None, None)
        .await;
    assert_fresh(&retry, &sample_book());
    assert_eq!(network.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn spawned_readers_fetch_once() {
    let (cache, _, _) = fixtures::service(fixtures::test_config())
        .await
        .expect("service should start");
    let network = MockNetwork::returning(sample_book()).with_latency(Duration::from_millis(100));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let cache = cache.clone();
            let fetcher = network.fetcher();
            tokio::spawn(async move {
                cache
                    .fetch::<Book, _, _, _>("book_42", "books", fetcher, None, None)
                    .await
            })
        })
        .collect();

    for handle in handles {
        let result = handle.await.expect("reader task should not panic");
        assert_fresh(&result, &sample_book());
    }
    assert_eq!(network.calls(), 1);
}

#[tokio::test]
async fn different_keys_fetch_independently() {
    let (cache, _, _) = fixtures::service(fixtures::test_config())
        .await
        .expect("service should start");
    let network = MockNetwork::returning(sample_book()).with_latency(Duration::from_millis(20));

    let reads = ["book_1", "book_2", "book_3"]
        .into_iter()
        .map(|key| cache.fetch::<Book, _, _, _>(key, "books", network.fetcher(), None, None));
    let results = join_all(reads).await;

    assert!(results.iter().all(CacheResult::is_fresh));
    assert_eq!(network.calls(), 3);
}
