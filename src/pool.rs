//! Bounded fetch task pool.
//!
//! Admission is non-blocking: a task either starts right away or is turned
//! down, and the scheduler simply retries on its next tick.  Capacity is a
//! [`Semaphore`] permit held for the life of each task, and outstanding
//! tasks are tracked by a [`TaskTracker`] so shutdown can wait for them.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::source::SourceId;

/// Result of a [`WorkerPool::try_spawn`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started,
    /// Every permit is taken.
    Saturated,
    /// A task for the same source is still running.
    Busy,
    /// The pool has been closed for shutdown.
    Closed,
}

/// Bounded set of fetch tasks, at most one per source.
pub struct WorkerPool {
    capacity: usize,
    permits: Arc<Semaphore>,
    running: Arc<Mutex<HashSet<SourceId>>>,
    tracker: TaskTracker,
}

/// Removes a source from the running set when its task ends, even on panic.
struct RunningGuard {
    running: Arc<Mutex<HashSet<SourceId>>>,
    id: SourceId,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            running: Arc::new(Mutex::new(HashSet::new())),
            tracker: TaskTracker::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks currently holding a permit.
    pub fn active(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    pub fn is_running(&self, id: &SourceId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    /// Start `task` for source `id` if there is capacity and no other task
    /// for `id` is running.
    pub fn try_spawn<F>(&self, id: SourceId, task: F) -> Admission
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            return Admission::Closed;
        }

        // Holding the set lock across the permit check keeps "busy" and
        // "started" decisions for one source atomic.
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.contains(&id) {
            return Admission::Busy;
        }
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return Admission::Saturated,
        };
        running.insert(id.clone());
        drop(running);

        let guard = RunningGuard {
            running: Arc::clone(&self.running),
            id,
        };
        self.tracker.spawn(async move {
            // Permit and running-set entry are held for the duration of the task.
            let _permit = permit;
            let _guard = guard;
            task.await;
        });
        Admission::Started
    }

    /// Refuse all further admissions.
    pub fn close(&self) {
        self.tracker.close();
    }

    /// Close the pool and wait up to `deadline` for outstanding tasks.
    ///
    /// Returns `true` if every task finished in time.  Tasks still running
    /// at the deadline are left to finish on their own.
    pub async fn drain(&self, deadline: Duration) -> bool {
        self.close();
        let outstanding = self.tracker.len();
        if outstanding > 0 {
            info!(outstanding, ?deadline, "waiting for in-flight fetches");
        }

        match tokio::time::timeout(deadline, self.tracker.wait()).await {
            Ok(()) => {
                debug!("worker pool drained");
                true
            }
            Err(_) => {
                warn!(abandoned = self.tracker.len(), "shutdown deadline elapsed, abandoning fetches");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn admits_up_to_capacity_then_saturates() {
        let pool = WorkerPool::new(2);
        let (tx_a, rx_a) = oneshot::channel::<()>();
        let (_tx_b, rx_b) = oneshot::channel::<()>();

        assert_eq!(pool.try_spawn("a".into(), async { let _ = rx_a.await; }), Admission::Started);
        assert_eq!(pool.try_spawn("b".into(), async { let _ = rx_b.await; }), Admission::Started);
        assert_eq!(pool.try_spawn("c".into(), async {}), Admission::Saturated);
        assert_eq!(pool.active(), pool.capacity());

        tx_a.send(()).unwrap();
        while pool.is_running(&"a".into()) {
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.try_spawn("c".into(), async {}), Admission::Started);
    }

    #[tokio::test]
    async fn same_source_is_never_admitted_twice() {
        let pool = WorkerPool::new(4);
        let (tx, rx) = oneshot::channel::<()>();

        assert_eq!(pool.try_spawn("a".into(), async { let _ = rx.await; }), Admission::Started);
        assert_eq!(pool.try_spawn("a".into(), async {}), Admission::Busy);
        assert_eq!(pool.active(), 1, "busy rejection must not consume a permit");

        tx.send(()).unwrap();
        assert!(pool.drain(Duration::from_secs(5)).await);
        assert!(!pool.is_running(&"a".into()));
    }

    #[tokio::test]
    async fn panicking_task_releases_its_slot() {
        let pool = WorkerPool::new(1);
        assert_eq!(pool.try_spawn("a".into(), async { panic!("fetcher bug") }), Admission::Started);

        assert!(pool.drain(Duration::from_secs(5)).await);
        assert_eq!(pool.active(), 0);
        assert!(!pool.is_running(&"a".into()));
    }

    #[tokio::test]
    async fn closed_pool_admits_nothing() {
        let pool = WorkerPool::new(1);
        pool.close();
        assert_eq!(pool.try_spawn("a".into(), async {}), Admission::Closed);
    }

    #[tokio::test]
    async fn drain_gives_up_at_deadline() {
        let pool = WorkerPool::new(1);
        pool.try_spawn("slow".into(), tokio::time::sleep(Duration::from_secs(30)));

        let started = std::time::Instant::now();
        assert!(!pool.drain(Duration::from_millis(50)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
