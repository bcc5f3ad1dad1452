//! Deferred wall-clock callbacks with explicit cancellation.
//!
//! Every reminder ladder and debounce in the engine runs through this table
//! so that `cancel_all` can tear down every outstanding callback before the
//! conversation records they would act on are discarded. A canceled timer
//! never runs its callback; a timer that already started firing is past the
//! point of cancellation, which is why every callback re-checks live state
//! before acting.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Opaque handle to a scheduled callback. Owned by the conversation state
/// that armed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

#[cfg(test)]
impl TimerHandle {
    pub(crate) fn from_raw_for_test(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Default)]
pub struct Timers {
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `callback` to run after `delay`. The returned handle stays
    /// valid until the timer fires or is canceled.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let table = Arc::clone(&self.tasks);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Remove ourselves first so a concurrent cancel after this point
            // is a no-op rather than an abort mid-callback.
            table.lock().remove(&id);
            callback.await;
        });
        self.tasks.lock().insert(id, task);
        TimerHandle(id)
    }

    /// Cancel a pending timer. Returns false when the timer already fired
    /// (or was never registered).
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        match self.tasks.lock().remove(&handle.0) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every pending timer. Called before the state they act on is
    /// discarded.
    pub fn cancel_all(&self) {
        let drained: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock();
            tasks.drain().map(|(_, task)| task).collect()
        };
        let count = drained.len();
        for task in drained {
            task.abort();
        }
        if count > 0 {
            tracing::debug!(count, "canceled all pending timers");
        }
    }

    /// Number of timers currently pending.
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn scheduled_callback_fires_after_delay() {
        let timers = Arc::new(Timers::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_clone = Arc::clone(&fired);
        timers.schedule(Duration::from_secs(5), async move {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Let the spawned task run its first poll so the sleep timer is armed
        // before we advance the paused clock.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn canceled_timer_never_fires() {
        let timers = Arc::new(Timers::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_clone = Arc::clone(&fired);
        let handle = timers.schedule(Duration::from_secs(5), async move {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(timers.cancel(handle));
        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_reports_false() {
        let timers = Arc::new(Timers::new());
        let handle = timers.schedule(Duration::from_millis(10), async {});

        // Let the spawned task run its first poll so the sleep timer is armed
        // before we advance the paused clock.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;
        assert!(!timers.cancel(handle));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_clears_every_pending_timer() {
        let timers = Arc::new(Timers::new());
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let fired_clone = Arc::clone(&fired);
            timers.schedule(Duration::from_secs(60), async move {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(timers.pending(), 4);

        timers.cancel_all();
        assert_eq!(timers.pending(), 0);

        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
