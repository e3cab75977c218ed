//! Lock helpers.
//!
//! Every critical section in this crate leaves its data consistent before any
//! call that could panic, so a poisoned lock is recovered rather than
//! propagated.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// PER-KEY LOCKS
// ============================================================================

/// Async mutexes keyed by string, created on first use.
///
/// An entry lives only while some task holds or waits for it, so the map
/// stays as small as the set of keys currently being worked on.
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub(crate) async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mutex = Arc::clone(lock(&self.locks).entry(key.to_string()).or_default());
        let guard = Arc::clone(&mutex).lock_owned().await;
        KeyGuard {
            owner: self,
            key: key.to_string(),
            mutex,
            guard: Some(guard),
        }
    }

    /// Keys with a live lock entry.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.locks).len()
    }
}

/// Exclusive access to one key. Released on drop.
pub(crate) struct KeyGuard<'a> {
    owner: &'a KeyLocks,
    key: String,
    mutex: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = lock(&self.owner.locks);
        // The map and this guard are the only holders: nobody is waiting
        if Arc::strong_count(&self.mutex) == 2 {
            locks.remove(&self.key);
        }
    }
}
