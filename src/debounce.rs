//! Trailing-edge debouncing for side-effecting callbacks.
//!
//! The reader owns one [`Debouncer`] per concern (progress reports,
//! mark-read) instead of juggling raw timer handles: every `call`
//! replaces the previously scheduled action, so only the final action
//! in a burst runs, after the configured quiet period.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Schedules a future to run after a quiet period, resetting the timer
/// on every call.
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Creates a debouncer with the given quiet period.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Schedules `action` to run after the delay, cancelling any
    /// previously scheduled action (trailing edge only).
    pub fn call<F>(&self, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });

        let mut pending = self.pending.lock();
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    /// Cancels the pending action, if any.
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn settle() {
        // Let aborted/woken tasks run to completion on the paused clock.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_calls_fire_once_with_final_value() {
        let debouncer = Debouncer::new(Duration::from_secs(2));
        let fired = Arc::new(AtomicUsize::new(0));
        let last_value = Arc::new(AtomicUsize::new(0));

        for value in 1..=5 {
            let fired = Arc::clone(&fired);
            let last_value = Arc::clone(&last_value);
            debouncer.call(async move {
                fired.fetch_add(1, Ordering::SeqCst);
                last_value.store(value, Ordering::SeqCst);
            });
            // Events arrive well inside the quiet period.
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tokio::time::sleep(Duration::from_millis(2100)).await;
        settle().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(last_value.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_fires_before_the_delay() {
        let debouncer = Debouncer::new(Duration::from_secs(2));
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_clone = Arc::clone(&fired);
        debouncer.call(async move {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(1900)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_pending_action() {
        let debouncer = Debouncer::new(Duration::from_secs(2));
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_clone = Arc::clone(&fired);
        debouncer.call(async move {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();

        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
