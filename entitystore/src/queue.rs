//! Cooperative task scheduler with FIFO ordering and barrier phase boundaries.
//!
//! Generalizes a per-key dogpile guard (one semaphore per cache
//! key) into a single global queue: a `tokio::sync::RwLock<()>` stands in for
//! the phase boundary (many concurrent readers = ordinary tasks in flight,
//! one exclusive writer = a barrier running alone), and an optional
//! `Semaphore` bounds how many ordinary tasks may run at once.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use entitystore_core::{EntityResult, EntityStoreError};
use tokio::sync::{OwnedRwLockReadGuard, OwnedSemaphorePermit, RwLock, Semaphore, oneshot};

use crate::config::QueueConfig;

/// Releases an acquired queue slot exactly once, however it is reached:
/// the task's own completion, or a caller-observed timeout racing it.
struct Slot {
    released: AtomicBool,
    guard: std::sync::Mutex<Option<(Option<OwnedSemaphorePermit>, OwnedRwLockReadGuard<()>)>>,
}

impl Slot {
    fn new(permit: Option<OwnedSemaphorePermit>, guard: OwnedRwLockReadGuard<()>) -> Arc<Self> {
        Arc::new(Self {
            released: AtomicBool::new(false),
            guard: std::sync::Mutex::new(Some((permit, guard))),
        })
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.guard.lock().expect("slot mutex poisoned").take();
        }
    }
}

/// FIFO task scheduler with an exclusive barrier phase.
///
/// `enqueue` runs a task concurrently with other enqueued tasks (subject to
/// an optional concurrency bound); `enqueue_barrier` runs a task alone, after
/// every previously-enqueued task has finished and before any subsequently
/// enqueued task starts.
#[derive(Clone)]
pub struct AsyncTaskQueue {
    barrier: Arc<RwLock<()>>,
    concurrency: Option<Arc<Semaphore>>,
    default_timeout: Option<Duration>,
}

impl AsyncTaskQueue {
    /// An unbounded queue with no per-task timeout.
    pub fn new() -> Self {
        Self {
            barrier: Arc::new(RwLock::new(())),
            concurrency: None,
            default_timeout: None,
        }
    }

    /// Builds a queue from a [`QueueConfig`].
    pub fn from_config(config: QueueConfig) -> Self {
        Self {
            barrier: Arc::new(RwLock::new(())),
            concurrency: config.max_concurrent_tasks().map(|n| Arc::new(Semaphore::new(n))),
            default_timeout: config.default_timeout(),
        }
    }

    /// Runs `task` under the queue's default timeout (if any). See
    /// [`AsyncTaskQueue::enqueue_with_timeout`] for the full contract.
    pub async fn enqueue<F, Fut, T>(&self, task: F) -> EntityResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue_with_timeout(task, self.default_timeout).await
    }

    /// Awaits this task's turn (FIFO among tasks currently eligible to run,
    /// behind any in-progress barrier), then runs it.
    ///
    /// If `timeout` elapses before the task completes, this returns
    /// [`EntityStoreError::TimeoutElapsed`] and releases the queue slot so
    /// later-enqueued tasks may proceed — but the task itself is not
    /// cancelled; it keeps running in the background and releases its own
    /// slot when it eventually finishes. Slot release is idempotent: whichever
    /// of "timeout" or "completion" happens first performs the release, the
    /// other is a no-op.
    ///
    /// Dropping the returned future before it resolves removes this task's
    /// place in line; a task that has already acquired its slot and started
    /// running is unaffected.
    pub async fn enqueue_with_timeout<F, Fut, T>(
        &self,
        task: F,
        timeout: Option<Duration>,
    ) -> EntityResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let wait_start = Instant::now();
        let read_guard = self.barrier.clone().read_owned().await;
        let permit = match &self.concurrency {
            Some(semaphore) => Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| EntityStoreError::QueueCancelled)?,
            ),
            None => None,
        };
        crate::metrics::record_queue_task(wait_start.elapsed());

        let slot = Slot::new(permit, read_guard);
        let slot_for_task = slot.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let value = task().await;
            slot_for_task.release();
            let _ = tx.send(value);
        });

        match timeout {
            Some(duration) => match tokio::time::timeout(duration, rx).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(EntityStoreError::QueueCancelled),
                Err(_) => {
                    slot.release();
                    crate::metrics::record_queue_timeout();
                    Err(EntityStoreError::TimeoutElapsed)
                }
            },
            None => rx.await.map_err(|_| EntityStoreError::QueueCancelled),
        }
    }

    /// Runs `task` exclusively: waits for every in-flight task to finish,
    /// runs `task` alone, then releases subsequently enqueued tasks.
    pub async fn enqueue_barrier<F, Fut, T>(&self, task: F) -> EntityResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let start = Instant::now();
        let _write_guard = self.barrier.write().await;
        let result = task().await;
        crate::metrics::record_barrier(start.elapsed());
        Ok(result)
    }
}

impl Default for AsyncTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn enqueue_runs_task_and_returns_value() {
        let queue = AsyncTaskQueue::new();
        let result = queue.enqueue(|| async { 42 }).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn barrier_waits_for_in_flight_tasks() {
        let queue = AsyncTaskQueue::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let order_a = order.clone();
        let slow = queue.enqueue(move || async move {
            tokio::time::sleep(StdDuration::from_millis(30)).await;
            order_a.lock().unwrap().push("slow");
        });

        // Give `slow` a chance to acquire its read guard first.
        tokio::time::sleep(StdDuration::from_millis(5)).await;

        let order_b = order.clone();
        let barrier = queue.enqueue_barrier(move || async move {
            order_b.lock().unwrap().push("barrier");
        });

        let (_, _) = tokio::join!(slow, barrier);
        assert_eq!(*order.lock().unwrap(), vec!["slow", "barrier"]);
    }

    #[tokio::test]
    async fn timeout_releases_slot_without_cancelling_task() {
        let queue = AsyncTaskQueue::new();
        let completed = Arc::new(AtomicBool::new(false));
        let completed_task = completed.clone();

        let result = queue
            .enqueue_with_timeout(
                move || async move {
                    tokio::time::sleep(StdDuration::from_millis(40)).await;
                    completed_task.store(true, Ordering::SeqCst);
                },
                Some(StdDuration::from_millis(5)),
            )
            .await;

        assert!(matches!(result, Err(EntityStoreError::TimeoutElapsed)));
        assert!(!completed.load(Ordering::SeqCst));

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert!(completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn concurrency_bound_serializes_excess_tasks() {
        let queue = AsyncTaskQueue::from_config(QueueConfig::builder().max_concurrent_tasks(1).build());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let active = active.clone();
            let max_seen = max_seen.clone();
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(move || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(StdDuration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
