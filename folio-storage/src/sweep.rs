//! Periodic maintenance task.
//!
//! Removes expired entries from the memory tier and, while online, replays
//! queued pin operations. The delay before each run is chosen from the memory
//! fill ratio measured when the previous run finished.
//!
//! The task holds only a weak reference to its target. It stops when the
//! shutdown channel fires, when the sender is dropped, or when the target is
//! gone.

use std::sync::Weak;

use async_trait::async_trait;
use folio_core::SweepIntervals;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Work performed on each tick.
#[async_trait]
pub(crate) trait Maintenance: Send + Sync {
    /// Memory fill ratio used to pick the next delay.
    fn fill_ratio(&self) -> f64;

    async fn run_maintenance(&self);
}

pub(crate) fn spawn_sweep<T>(
    target: Weak<T>,
    intervals: SweepIntervals,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    T: Maintenance + 'static,
{
    tokio::spawn(sweep_task(target, intervals, shutdown_rx))
}

async fn sweep_task<T>(target: Weak<T>, intervals: SweepIntervals, mut shutdown_rx: watch::Receiver<bool>)
where
    T: Maintenance + 'static,
{
    tracing::info!(
        relaxed_secs = intervals.relaxed.as_secs(),
        moderate_secs = intervals.moderate.as_secs(),
        aggressive_secs = intervals.aggressive.as_secs(),
        "Cache sweep task started"
    );

    let mut runs = 0u64;
    loop {
        let delay = match target.upgrade() {
            Some(target) => intervals.for_fill_ratio(target.fill_ratio()),
            None => break,
        };

        tokio::select! {
            // Check for shutdown signal
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = tokio::time::sleep(delay) => {
                let Some(target) = target.upgrade() else {
                    break;
                };
                target.run_maintenance().await;
                runs += 1;
            }
        }
    }

    tracing::info!(runs, "Cache sweep task shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Counter {
        ratio: f64,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Maintenance for Counter {
        fn fill_ratio(&self) -> f64 {
            self.ratio
        }

        async fn run_maintenance(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_intervals() -> SweepIntervals {
        SweepIntervals {
            relaxed: Duration::from_secs(3600),
            moderate: Duration::from_secs(3600),
            aggressive: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_runs_at_aggressive_interval_when_full() {
        let target = Arc::new(Counter {
            ratio: 0.95,
            runs: AtomicUsize::new(0),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_sweep(Arc::downgrade(&target), fast_intervals(), shutdown_rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(target.runs.load(Ordering::SeqCst) >= 2);

        shutdown_tx.send(true).expect("receiver should be alive");
        handle.await.expect("task should stop cleanly");
    }

    #[tokio::test]
    async fn test_relaxed_interval_when_empty() {
        let target = Arc::new(Counter {
            ratio: 0.1,
            runs: AtomicUsize::new(0),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_sweep(Arc::downgrade(&target), fast_intervals(), shutdown_rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(target.runs.load(Ordering::SeqCst), 0);

        // Dropping the sender also stops the task
        drop(shutdown_tx);
        handle.await.expect("task should stop cleanly");
    }

    #[tokio::test]
    async fn test_stops_when_target_dropped() {
        let target = Arc::new(Counter {
            ratio: 0.95,
            runs: AtomicUsize::new(0),
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_sweep(Arc::downgrade(&target), fast_intervals(), shutdown_rx);

        drop(target);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should notice the target is gone")
            .expect("task should stop cleanly");
    }
}
