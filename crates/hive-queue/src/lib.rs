//! Counting queue: bounded FIFO shared between the control loop and tasks.

mod counting;
mod pop_future;

pub use counting::{CountingQueue, QueueFull};
pub use pop_future::PopFuture;
