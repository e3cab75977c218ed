//! Connectivity oracle.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

/// Answers whether the remote data source is reachable.
#[async_trait]
pub trait ConnectivityOracle: Send + Sync {
    /// Authoritative check. May suspend (e.g. to ping a server).
    async fn is_connected(&self) -> bool;

    /// Best-effort cached answer that never suspends.
    fn is_connected_sync(&self) -> bool;
}

/// Connectivity flag flipped by platform code.
#[derive(Debug)]
pub struct ConnectivityFlag {
    online: AtomicBool,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous != online {
            tracing::info!(online, "Connectivity changed");
        }
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::online()
    }
}

#[async_trait]
impl ConnectivityOracle for ConnectivityFlag {
    async fn is_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn is_connected_sync(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
