//! MergeLock: the process-wide serializer for `mergeWorktreeIntoMain`
//! (spec.md §3, §4.3).
//!
//! The upstream system implements this as a promise-chain mutex; per
//! SPEC_FULL.md §9 ("process-wide merge lock replaces the promise-chain
//! mutex with a FIFO mutex / channel of capacity one"), this is a
//! `tokio::sync::Mutex<()>` rather than the teacher's cross-process
//! `flock()`-based [`crate::file_lock`]-style lock: every run lives in the
//! same daemon process, so an in-process async mutex is sufficient, and
//! `tokio::sync::Mutex` already grants permits in FIFO acquisition order.
//! The guard is released on drop, including on panic, tying release to the
//! same scope that acquired it.

use std::future::Future;
use tokio::sync::Mutex;

pub struct MergeLock {
    inner: Mutex<()>,
}

impl MergeLock {
    pub fn new() -> Self {
        Self { inner: Mutex::new(()) }
    }

    /// Runs `f` while holding the lock. Acquisition queues fairly; the lock
    /// is released as soon as `f`'s future completes or is dropped (e.g. on
    /// cancellation), regardless of how it exits.
    pub async fn with_lock<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.inner.lock().await;
        f().await
    }
}

impl Default for MergeLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn critical_sections_never_overlap() {
        let lock = Arc::new(MergeLock::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let in_flight = in_flight.clone();
            let max_observed = max_observed.clone();
            handles.push(tokio::spawn(async move {
                lock.with_lock(|| async {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_observed.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lock_is_released_after_panic_inside_critical_section() {
        let lock = Arc::new(MergeLock::new());

        let lock2 = lock.clone();
        let panicked = tokio::spawn(async move {
            lock2.with_lock(|| async { panic!("boom") }).await;
        })
        .await;
        assert!(panicked.is_err());

        // If the guard leaked, this would hang.
        let acquired = tokio::time::timeout(
            Duration::from_millis(200),
            lock.with_lock(|| async { true }),
        )
        .await;
        assert_eq!(acquired.unwrap(), true);
    }
}
