use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};

/// Bounded FIFO hand-off between one producer and many workers.
///
/// Both ends wait with an explicit timeout. A push that cannot complete in
/// time hands the job back in [`QueueFull`] so nothing is silently dropped.
pub struct JobQueue<J> {
    items: Mutex<VecDeque<J>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
    pushed: AtomicUsize,
    popped: AtomicUsize,
}

/// Returned when a push timed out on a full queue.
pub struct QueueFull<J>(pub J);

impl<J> fmt::Debug for QueueFull<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueFull(..)")
    }
}

impl<J> fmt::Debug for JobQueue<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("capacity", &self.capacity)
            .field("depth", &self.len())
            .field("pushed", &self.pushed.load(Ordering::Relaxed))
            .field("popped", &self.popped.load(Ordering::Relaxed))
            .finish()
    }
}

impl<J> JobQueue<J> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            pushed: AtomicUsize::new(0),
            popped: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Append a job, waiting up to `wait` for a free slot.
    pub async fn push(&self, job: J, wait: Duration) -> Result<(), QueueFull<J>> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut items = self.items.lock();
                if items.len() < self.capacity {
                    items.push_back(job);
                    drop(items);
                    self.pushed.fetch_add(1, Ordering::Relaxed);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            if timeout_at(deadline, notified).await.is_err() {
                return Err(QueueFull(job));
            }
        }
    }

    /// Take the oldest job, waiting up to `wait` for one to arrive.
    pub async fn pop(&self, wait: Duration) -> Option<J> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let job = self.items.lock().pop_front();
            if let Some(job) = job {
                self.popped.fetch_add(1, Ordering::Relaxed);
                self.not_full.notify_one();
                return Some(job);
            }

            if timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            depth: self.len(),
            capacity: self.capacity,
            pushed: self.pushed.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub depth: usize,
    pub capacity: usize,
    pub pushed: usize,
    pub popped: usize,
}

/// Completion flag set by the producer once enumeration has finished.
///
/// Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct DoneSignal {
    inner: Arc<DoneInner>,
}

#[derive(Debug, Default)]
struct DoneInner {
    set: AtomicBool,
    notify: Notify,
}

impl DoneSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.inner.set.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Wait until the flag is set.
    pub async fn wait(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_set() {
            return;
        }
        notified.await;
    }

    /// Guard that sets the flag when dropped, whatever the exit path.
    pub fn guard(&self) -> DoneGuard {
        DoneGuard(self.clone())
    }
}

/// Sets its [`DoneSignal`] on drop.
#[derive(Debug)]
pub struct DoneGuard(DoneSignal);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.set();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::new(4);
        for i in 0..4 {
            queue.push(i, Duration::from_millis(10)).await.unwrap();
        }
        for i in 0..4 {
            assert_eq!(queue.pop(Duration::from_millis(10)).await, Some(i));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_push_times_out_when_full_and_returns_job() {
        let queue = JobQueue::new(1);
        queue.push("a", Duration::from_millis(10)).await.unwrap();
        let err = queue.push("b", Duration::from_millis(30)).await.unwrap_err();
        assert_eq!(err.0, "b");
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_pop_times_out_when_empty() {
        let queue: JobQueue<u32> = JobQueue::new(2);
        let started = Instant::now();
        assert_eq!(queue.pop(Duration::from_millis(30)).await, None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_blocked_push_resumes_after_pop() {
        let queue = Arc::new(JobQueue::new(1));
        queue.push(1, Duration::from_millis(10)).await.unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(2, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.pop(Duration::from_secs(1)).await, Some(1));
        producer.await.unwrap().unwrap();
        assert_eq!(queue.pop(Duration::from_secs(1)).await, Some(2));

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.pushed, 2);
        assert_eq!(snapshot.popped, 2);
        assert_eq!(snapshot.depth, 0);
    }

    #[tokio::test]
    async fn test_waiting_pop_wakes_on_push() {
        let queue = Arc::new(JobQueue::new(2));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(7, Duration::from_millis(10)).await.unwrap();
        assert_eq!(consumer.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_done_signal_shared_and_wakes_waiters() {
        let done = DoneSignal::new();
        let clone = done.clone();
        let waiter = tokio::spawn(async move { clone.wait().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!done.is_set());
        done.set();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
        tokio::time::timeout(Duration::from_millis(50), done.wait())
            .await
            .expect("already set returns immediately");
    }

    #[tokio::test]
    async fn test_done_guard_sets_on_drop_even_after_panic() {
        let done = DoneSignal::new();
        let guard_done = done.clone();
        let result = tokio::spawn(async move {
            let _guard = guard_done.guard();
            panic!("producer died");
        })
        .await;
        assert!(result.is_err());
        assert!(done.is_set());
    }
}
