//! Bounded FIFO with a pending-item counter.

use crate::PopFuture;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};

/// Returned by [`CountingQueue::try_push`] when the buffer is at capacity.
#[derive(thiserror::Error)]
#[error("queue is full (capacity {capacity})")]
pub struct QueueFull<T> {
    pub item: T,
    pub capacity: usize,
}

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueFull")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Bounded multi-producer, multi-consumer FIFO.
///
/// `len()` counts items that were pushed and not yet popped. It is bumped while
/// holding a channel permit, before the item becomes visible to consumers, so
/// it can never go below zero.
///
/// Items popped by a [`PopFuture`] that nobody collected are put back at the
/// head and served before anything still in the channel.
pub struct CountingQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
    returned: std::sync::Mutex<VecDeque<T>>,
    returned_ready: Notify,
    pending: AtomicUsize,
    capacity: usize,
}

impl<T> CountingQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            returned: std::sync::Mutex::new(VecDeque::new()),
            returned_ready: Notify::new(),
            pending: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Append to the tail, waiting while the queue is full.
    pub async fn push(&self, item: T) {
        match self.tx.reserve().await {
            Ok(permit) => {
                self.pending.fetch_add(1, Ordering::AcqRel);
                permit.send(item);
            }
            // Receiver lives in self, so this only happens mid-drop.
            Err(_) => tracing::warn!("queue receiver gone, item discarded"),
        }
    }

    /// Append without waiting; hands the item back when the queue is full.
    pub fn try_push(&self, item: T) -> Result<(), QueueFull<T>> {
        match self.tx.try_reserve() {
            Ok(permit) => {
                self.pending.fetch_add(1, Ordering::AcqRel);
                permit.send(item);
                Ok(())
            }
            Err(_) => Err(QueueFull {
                item,
                capacity: self.capacity,
            }),
        }
    }

    /// Remove the head item, waiting until one is available.
    ///
    /// Cancel-safe: if the returned future is dropped before completion no
    /// item is consumed.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.take_returned() {
                return item;
            }
            let mut rx = self.rx.lock().await;
            // Registered before the re-check so a put-back in between still wakes us.
            let put_back = self.returned_ready.notified();
            if let Some(item) = self.take_returned() {
                return item;
            }
            tokio::select! {
                biased;
                item = rx.recv() => match item {
                    Some(item) => {
                        self.pending.fetch_sub(1, Ordering::AcqRel);
                        return item;
                    }
                    // The sender is owned by self; the channel cannot close under us.
                    None => std::future::pending::<()>().await,
                },
                _ = put_back => continue,
            }
        }
    }

    /// Remove the head item if one is buffered and no other consumer is waiting.
    pub fn try_pop(&self) -> Option<T> {
        if let Some(item) = self.take_returned() {
            return Some(item);
        }
        let mut rx = self.rx.try_lock().ok()?;
        let item = rx.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(item)
    }

    /// Remove every buffered item and return them in FIFO order.
    ///
    /// The queue stays open: pushes after (or during) a drain are kept. Returns
    /// as soon as the buffer is empty, so draining an idle queue never hangs.
    pub async fn drain(&self) -> Vec<T> {
        let mut rx = self.rx.lock().await;
        let mut out = Vec::new();
        while let Some(item) = self.take_returned() {
            out.push(item);
        }
        while let Ok(item) = rx.try_recv() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            out.push(item);
        }
        out
    }

    /// Discard every buffered item; returns how many were dropped.
    pub async fn flush(&self) -> usize {
        self.drain().await.len()
    }

    /// Number of items pushed and not yet popped.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Put a popped item back at the head. Does not wait for capacity.
    pub(crate) fn put_back(&self, item: T) {
        let mut returned = self.returned.lock().unwrap_or_else(|e| e.into_inner());
        self.pending.fetch_add(1, Ordering::AcqRel);
        returned.push_front(item);
        drop(returned);
        self.returned_ready.notify_one();
    }

    fn take_returned(&self) -> Option<T> {
        let mut returned = self.returned.lock().unwrap_or_else(|e| e.into_inner());
        let item = returned.pop_front()?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(item)
    }
}

impl<T: Send + 'static> CountingQueue<T> {
    /// Start a background pop and return a handle that resolves with the item.
    ///
    /// Lets a single loop wait on this queue alongside timers and signals.
    /// Dropping the handle never loses an item: a pop still waiting is
    /// cancelled, and an item already taken is put back at the head.
    pub fn pop_future(self: &Arc<Self>) -> PopFuture<T> {
        PopFuture::spawn(self)
    }
}

impl<T> fmt::Debug for CountingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingQueue")
            .field("pending", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn push_increments_and_pop_takes_from_front() {
        let q = CountingQueue::new(8);
        q.push(1).await;
        q.push(2).await;
        assert_eq!(q.len(), 2);

        assert_eq!(q.pop().await, 1);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop().await, 2);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn try_push_reports_full_and_returns_item() {
        let q = CountingQueue::new(1);
        q.try_push("a").unwrap();
        let err = q.try_push("b").unwrap_err();
        assert_eq!(err.item, "b");
        assert_eq!(err.capacity, 1);
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn push_blocks_until_space_frees() {
        let q = Arc::new(CountingQueue::new(1));
        q.push(1).await;

        let blocked = timeout(Duration::from_millis(50), q.push(2)).await;
        assert!(blocked.is_err(), "push should wait while full");
        assert_eq!(q.len(), 1, "a cancelled push must not be counted");

        let producer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.push(2).await })
        };
        assert_eq!(q.pop().await, 1);
        producer.await.unwrap();
        assert_eq!(q.pop().await, 2);
    }

    #[tokio::test]
    async fn try_pop_on_empty_is_none() {
        let q: CountingQueue<u8> = CountingQueue::new(4);
        assert!(q.try_pop().is_none());
        q.push(9).await;
        assert_eq!(q.try_pop(), Some(9));
        assert_eq!(q.len(), 0);
    }

    #[tokio::test]
    async fn pop_future_resolves_after_later_push() {
        let q = Arc::new(CountingQueue::new(4));
        let fut = q.pop_future();
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.push("late").await;
        assert_eq!(timeout(Duration::from_secs(1), fut).await.unwrap(), Some("late"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn dropped_pop_future_consumes_nothing() {
        let q = Arc::new(CountingQueue::new(4));
        let fut = q.pop_future();
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(fut);

        q.push(5).await;
        let got = timeout(Duration::from_secs(1), q.pop()).await.unwrap();
        assert_eq!(got, 5);
    }

    #[tokio::test]
    async fn dropping_a_ready_pop_future_puts_the_item_back() {
        let q = Arc::new(CountingQueue::new(8));
        for i in 0..5 {
            q.push(i).await;
        }
        let fut = q.pop_future();
        timeout(Duration::from_secs(1), async {
            while !fut.is_ready() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(q.len(), 4);

        drop(fut);
        assert_eq!(q.len(), 5);
        assert_eq!(q.drain().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn put_back_item_wakes_a_waiting_pop() {
        let q = Arc::new(CountingQueue::new(4));
        q.push(1).await;
        let first = q.pop().await;

        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.put_back(first);
        let got = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(got, 1);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn put_back_item_is_served_before_the_channel() {
        let q = CountingQueue::new(4);
        q.push(1).await;
        q.push(2).await;
        let first = q.pop().await;
        q.put_back(first);
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.pop().await, 2);
    }

    #[tokio::test]
    async fn drain_keeps_queue_open() {
        let q = CountingQueue::new(8);
        for i in 0..3 {
            q.push(i).await;
        }
        assert_eq!(q.drain().await, vec![0, 1, 2]);
        assert_eq!(q.len(), 0);

        q.push(7).await;
        assert_eq!(q.pop().await, 7);
    }

    #[tokio::test]
    async fn flush_on_empty_queue_returns_immediately() {
        let q: CountingQueue<u32> = CountingQueue::new(8);
        let n = timeout(Duration::from_millis(100), q.flush()).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn count_settles_to_zero_under_contention() {
        let q = Arc::new(CountingQueue::new(16));
        let mut handles = Vec::new();
        for p in 0..4 {
            let q = Arc::clone(&q);
            handles.push(tokio::spawn(async move {
                for i in 0..250 {
                    q.push(p * 1000 + i).await;
                }
            }));
        }
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move {
                let mut seen = 0;
                while seen < 1000 {
                    q.pop().await;
                    seen += 1;
                }
                seen
            })
        };
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(consumer.await.unwrap(), 1000);
        assert_eq!(q.len(), 0);
    }
}
