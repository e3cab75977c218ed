//! Single-flight network fetches.
//!
//! For any key at most one fetch future is in flight. The first caller
//! installs a shared future in the registry; callers arriving while it runs
//! await a clone of it and receive the same value or the same error. The
//! future removes its own registry entry as soon as it settles, whether it
//! succeeded or not, so the next request after that starts a new fetch.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use folio_core::{FolioError, FolioResult};
use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::sync::lock;

type AnyValue = Arc<dyn Any + Send + Sync>;
type InFlight = Shared<BoxFuture<'static, Result<AnyValue, FolioError>>>;

/// Registry of in-flight fetches keyed by cache key.
#[derive(Clone, Default)]
pub struct FetchCoordinator {
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
}

impl FetchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fetch` for `key` unless a fetch for `key` is already running, in
    /// which case wait for that one instead.
    ///
    /// `fetch` is only invoked by the caller that installs the in-flight
    /// entry; other callers drop theirs unused.
    pub async fn fetch_once<T, F, Fut>(&self, key: &str, fetch: F) -> FolioResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = FolioResult<T>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(key) {
                Some(existing) => {
                    tracing::debug!(key, "Joining in-flight fetch");
                    existing.clone()
                }
                None => {
                    let registry = Arc::clone(&self.in_flight);
                    let owned_key = key.to_string();
                    let task = async move {
                        let outcome = fetch().await.map(|value| Arc::new(value) as AnyValue);
                        lock(&registry).remove(&owned_key);
                        outcome
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key.to_string(), task.clone());
                    task
                }
            }
        };

        let value = shared.await?;
        value
            .downcast::<T>()
            .map(|value| T::clone(&value))
            .map_err(|_| {
                FolioError::type_conversion::<T>(key, "in-flight fetch produced a different type")
            })
    }

    /// Number of keys with a fetch in flight.
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Whether a fetch for `key` is in flight.
    pub fn is_in_flight(&self, key: &str) -> bool {
        lock(&self.in_flight).contains_key(key)
    }
}
