//! Handle for a pop running on a background tokio task.

use crate::CountingQueue;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Resolves once with the popped item.
///
/// The background task hands the item over through a oneshot channel. If the
/// handle is gone by then, the task puts the item back at the head of the
/// queue; if the handle is dropped while an item waits in the channel, the
/// drop does the same. Either way a popped item is delivered or returned.
///
/// Resolves to `None` only if the background pop was cancelled or panicked.
pub struct PopFuture<T> {
    rx: oneshot::Receiver<T>,
    handle: JoinHandle<()>,
    queue: Arc<CountingQueue<T>>,
    resolved: bool,
}

impl<T: Send + 'static> PopFuture<T> {
    pub(crate) fn spawn(queue: &Arc<CountingQueue<T>>) -> Self {
        let (tx, rx) = oneshot::channel();
        let source = Arc::clone(queue);
        // No await between the pop and the send, so an abort either lands
        // inside the (cancel-safe) pop or not at all.
        let handle = tokio::spawn(async move {
            let item = source.pop().await;
            if let Err(item) = tx.send(item) {
                tracing::debug!("pop future gone before delivery; item put back");
                source.put_back(item);
            }
        });
        Self {
            rx,
            handle,
            queue: Arc::clone(queue),
            resolved: false,
        }
    }
}

impl<T> PopFuture<T> {
    /// True once the background pop has handed over an item (or has ended).
    pub fn is_ready(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for PopFuture<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.resolved {
            return Poll::Ready(None);
        }
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(result) => {
                this.resolved = true;
                match result {
                    Ok(item) => Poll::Ready(Some(item)),
                    Err(_) => {
                        tracing::error!("background pop ended without an item");
                        Poll::Ready(None)
                    }
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for PopFuture<T> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        self.handle.abort();
        // After close() the task can no longer send; anything already sent
        // is still readable here.
        self.rx.close();
        if let Ok(item) = self.rx.try_recv() {
            tracing::debug!("pop future dropped with an item waiting; item put back");
            self.queue.put_back(item);
        }
    }
}
